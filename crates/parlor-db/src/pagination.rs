//! Keyset (cursor) pagination shared by every ordered listing.
//!
//! A listing is a [`Query`] (select list, FROM clause, filters) plus a
//! [`SortOrder`]. The sort order always ends with the row id ascending so
//! that rows with equal sort keys still have a single total order. A cursor
//! is the row's sort-key tuple, so paging never re-scans skipped rows: the
//! next page is "rows strictly after this tuple".

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};

use parlor_types::pagination::{
    Connection as Page, DEFAULT_PAGE_SIZE, Edge, MAX_PAGE_SIZE, PageArgs, PageInfo,
};

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Comparison that selects rows coming after a key in this direction.
    fn after_op(self) -> &'static str {
        match self {
            Self::Asc => ">",
            Self::Desc => "<",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: &'static str,
    pub direction: Direction,
}

impl SortKey {
    pub const fn asc(expr: &'static str) -> Self {
        Self {
            expr,
            direction: Direction::Asc,
        }
    }

    pub const fn desc(expr: &'static str) -> Self {
        Self {
            expr,
            direction: Direction::Desc,
        }
    }
}

/// Sort keys of a listing with the id tie-break appended.
/// Key expressions must never evaluate to NULL.
#[derive(Debug, Clone)]
pub struct SortOrder {
    keys: Vec<SortKey>,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    After,
    Before,
}

impl SortOrder {
    pub fn new(mut keys: Vec<SortKey>, id_expr: &'static str) -> Self {
        keys.push(SortKey::asc(id_expr));
        Self { keys }
    }

    fn arity(&self) -> usize {
        self.keys.len()
    }

    fn select_keys(&self) -> String {
        self.keys.iter().map(|k| k.expr).collect::<Vec<_>>().join(", ")
    }

    fn order_by(&self, reversed: bool) -> String {
        self.keys
            .iter()
            .map(|k| {
                let dir = if reversed { k.direction.reversed() } else { k.direction };
                format!("{} {}", k.expr, dir.keyword())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Lexicographic tuple comparison against a cursor:
    /// `k1 > ? OR (k1 = ? AND (k2 > ? OR (k2 = ? AND ...)))`.
    fn seek(&self, cursor: &Cursor, side: Side) -> (String, Vec<Value>) {
        let op = |key: &SortKey| {
            let dir = match side {
                Side::After => key.direction,
                Side::Before => key.direction.reversed(),
            };
            dir.after_op()
        };

        let last = self.keys.len() - 1;
        let mut sql = format!("{} {} ?", self.keys[last].expr, op(&self.keys[last]));
        let mut params = vec![cursor.0[last].clone()];

        for i in (0..last).rev() {
            let key = &self.keys[i];
            sql = format!(
                "({k} {op} ? OR ({k} = ? AND {inner}))",
                k = key.expr,
                op = op(key),
                inner = sql
            );
            let mut outer = vec![cursor.0[i].clone(), cursor.0[i].clone()];
            outer.extend(params);
            params = outer;
        }

        (format!("({})", sql), params)
    }
}

/// Opaque position marker: the sort-key tuple of a row, JSON encoded and
/// wrapped in URL-safe base64.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor(Vec<Value>);

impl Cursor {
    pub fn encode(&self) -> String {
        let values: Vec<serde_json::Value> = self
            .0
            .iter()
            .map(|v| match v {
                Value::Null => serde_json::Value::Null,
                Value::Integer(i) => serde_json::Value::from(*i),
                Value::Real(f) => serde_json::Value::from(*f),
                Value::Text(s) => serde_json::Value::from(s.as_str()),
                Value::Blob(b) => serde_json::Value::from(B64.encode(b)),
            })
            .collect();
        B64.encode(serde_json::Value::Array(values).to_string())
    }

    pub fn decode(raw: &str, arity: usize) -> Result<Self> {
        let invalid = || ChatError::bad_request("invalid cursor");
        let bytes = B64.decode(raw).map_err(|_| invalid())?;
        let values: Vec<serde_json::Value> = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        if values.len() != arity {
            return Err(invalid());
        }

        values
            .into_iter()
            .map(|v| match v {
                serde_json::Value::Null => Ok(Value::Null),
                serde_json::Value::Bool(b) => Ok(Value::Integer(b as i64)),
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .map(Value::Integer)
                    .or_else(|| n.as_f64().map(Value::Real))
                    .ok_or_else(invalid),
                serde_json::Value::String(s) => Ok(Value::Text(s)),
                _ => Err(invalid()),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

/// Filtered row source for a listing. Parameters bound in the FROM clause
/// come first, followed by one group per filter in the order added.
#[derive(Debug, Clone)]
pub struct Query {
    select: String,
    from: String,
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl Query {
    pub fn new(
        select: impl Into<String>,
        from: impl Into<String>,
        from_params: Vec<Value>,
    ) -> Self {
        Self {
            select: select.into(),
            from: from.into(),
            conditions: Vec::new(),
            params: from_params,
        }
    }

    pub fn filter(&mut self, condition: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.conditions.push(condition.into());
        self.params.extend(params);
        self
    }

    fn where_clause(conditions: &[String]) -> String {
        if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        }
    }
}

enum Window {
    Forward { size: usize, after: Option<Cursor> },
    Backward { size: usize, before: Option<Cursor> },
}

impl Window {
    fn resolve(args: &PageArgs, arity: usize) -> Result<Self> {
        let forward = args.first.is_some() || args.after.is_some();
        let backward = args.last.is_some() || args.before.is_some();
        if forward && backward {
            return Err(ChatError::bad_request(
                "first/after cannot be combined with last/before",
            ));
        }

        let size = |n: Option<u32>| n.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE) as usize;
        let cursor = |raw: &Option<String>| {
            raw.as_deref()
                .map(|c| Cursor::decode(c, arity))
                .transpose()
        };

        if backward {
            Ok(Self::Backward {
                size: size(args.last),
                before: cursor(&args.before)?,
            })
        } else {
            Ok(Self::Forward {
                size: size(args.first),
                after: cursor(&args.after)?,
            })
        }
    }
}

/// Fetch one page of `query` in `order`. Does not compute a total count.
pub fn paginate<T, F>(
    conn: &Connection,
    query: &Query,
    order: &SortOrder,
    args: &PageArgs,
    map: F,
) -> Result<Page<T>>
where
    F: Fn(&Row) -> rusqlite::Result<T>,
{
    let arity = order.arity();
    let window = Window::resolve(args, arity)?;
    let (size, cursor, side) = match &window {
        Window::Forward { size, after } => (*size, after.as_ref(), Side::After),
        Window::Backward { size, before } => (*size, before.as_ref(), Side::Before),
    };
    let backward = matches!(side, Side::Before);

    let mut conditions = query.conditions.clone();
    let mut params = query.params.clone();
    if let Some(cursor) = cursor {
        let (seek, seek_params) = order.seek(cursor, side);
        conditions.push(seek);
        params.extend(seek_params);
    }

    let sql = format!(
        "SELECT {}, {} {} {} ORDER BY {} LIMIT {}",
        query.select,
        order.select_keys(),
        query.from,
        Query::where_clause(&conditions),
        order.order_by(backward),
        size + 1,
    );

    let mut stmt = conn.prepare(&sql)?;
    let key_start = stmt.column_count() - arity;
    let mut edges = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let node = map(row)?;
            let keys = (key_start..key_start + arity)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Edge {
                cursor: Cursor(keys).encode(),
                node,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let has_more = edges.len() > size;
    edges.truncate(size);
    if backward {
        edges.reverse();
    }

    // Rows on the far side of the cursor exist iff not every row is past it.
    let has_behind = match cursor {
        Some(cursor) => {
            let (seek, seek_params) = order.seek(cursor, side);
            let mut conditions = query.conditions.clone();
            conditions.push(format!("NOT {}", seek));
            let mut params = query.params.clone();
            params.extend(seek_params);
            exists(conn, &query.from, &conditions, &params)?
        }
        None => false,
    };

    let (has_next_page, has_previous_page) = if backward {
        (has_behind, has_more)
    } else {
        (has_more, has_behind)
    };

    let page_info = PageInfo {
        has_next_page,
        has_previous_page,
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
    };

    Ok(Page {
        edges,
        page_info,
        total_count: None,
    })
}

/// Every row of `query` in `order`, unpaged.
pub fn fetch_all<T, F>(
    conn: &Connection,
    query: &Query,
    order: &SortOrder,
    map: F,
) -> Result<Vec<T>>
where
    F: Fn(&Row) -> rusqlite::Result<T>,
{
    let sql = format!(
        "SELECT {} {} {} ORDER BY {}",
        query.select,
        query.from,
        Query::where_clause(&query.conditions),
        order.order_by(false),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(query.params.iter()), map)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Row count of `query`, independent of any page window.
pub fn count(conn: &Connection, query: &Query) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) {} {}", query.from, Query::where_clause(&query.conditions));
    let n = conn.query_row(&sql, params_from_iter(query.params.iter()), |r| r.get(0))?;
    Ok(n)
}

fn exists(conn: &Connection, from: &str, conditions: &[String], params: &[Value]) -> Result<bool> {
    let sql = format!("SELECT EXISTS(SELECT 1 {} {})", from, Query::where_clause(conditions));
    let found = conn.query_row(&sql, params_from_iter(params.iter()), |r| r.get(0))?;
    Ok(found)
}
