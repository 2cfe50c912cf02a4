use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Roles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

/// Things a caller may be allowed to do beyond ordinary channel membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Read or act on any channel without being a participant.
    BypassMembership,
    /// Create, deactivate and delete channels.
    ManageChannels,
    /// List messages across all channels.
    ViewAllMessages,
    /// Post SYSTEM messages.
    SendSystemMessages,
}

/// Capability-set interface shared by roles and the callers carrying them.
pub trait Capabilities {
    fn can(&self, capability: Capability) -> bool;
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN" => Some(Self::Admin),
            "MEMBER" => Some(Self::Member),
            _ => None,
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Admin => &[
                Capability::BypassMembership,
                Capability::ManageChannels,
                Capability::ViewAllMessages,
                Capability::SendSystemMessages,
            ],
            Self::Member => &[],
        }
    }
}

impl Capabilities for Role {
    fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

// -- Caller identity --

/// The authenticated caller of an operation, as supplied by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn member(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            role: Role::Member,
        }
    }

    pub fn admin(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            role: Role::Admin,
        }
    }
}

impl Capabilities for Actor {
    fn can(&self, capability: Capability) -> bool {
        self.role.can(capability)
    }
}

/// JWT claims shared by the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub role: Role,
    pub exp: usize,
}

impl From<Claims> for Actor {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            username: claims.username,
            role: claims.role,
        }
    }
}
