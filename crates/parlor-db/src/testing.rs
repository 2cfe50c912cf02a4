use uuid::Uuid;

use parlor_types::actor::Role;
use parlor_types::models::{Channel, ChannelKind};

use crate::Database;
use crate::channels::NewChannel;

pub(crate) fn db() -> Database {
    Database::open_in_memory().unwrap()
}

pub(crate) fn user(db: &Database, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.ensure_user(id, name, Role::Member).unwrap();
    id
}

pub(crate) fn room(db: &Database, creator: Uuid, members: &[Uuid]) -> Channel {
    let new = NewChannel {
        name: Some("room".into()),
        kind: ChannelKind::Room,
        is_visible: true,
    };
    db.create_channel(&new, Some(creator), members).unwrap()
}
