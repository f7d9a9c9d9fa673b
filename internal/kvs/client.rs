use dashmap::DashMap;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

// One logical secondary index maps to one ordered set in the backing store.
pub type IndexId = u128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Status(String),
    Integer(i64),
    Bytes(Vec<u8>),
    Array(Vec<Reply>),
    Error(String),
}

#[derive(Debug, Clone)]
pub enum LexCommand {
    RangeByLex {
        index: IndexId,
        min: Vec<u8>,
        max: Vec<u8>,
        limit: usize,
    },
    Add {
        index: IndexId,
        member: Vec<u8>,
    },
    RemRangeByLex {
        index: IndexId,
        min: Vec<u8>,
        max: Vec<u8>,
    },
}

#[derive(Clone)]
pub enum LexClient {
    Memory(MemoryLexClient),
    Redis(RedisLexClient),
}

impl LexClient {
    pub async fn new(redis_url: Option<&str>) -> Result<Self, String> {
        if let Some(url) = redis_url {
            let client = RedisLexClient::new(url).await?;
            Ok(LexClient::Redis(client))
        } else {
            Ok(LexClient::Memory(MemoryLexClient::new()))
        }
    }

    pub async fn issue(&self, command: LexCommand) -> Result<Reply, String> {
        match self {
            LexClient::Memory(client) => Ok(client.issue(command)),
            LexClient::Redis(client) => client.issue(command).await,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryLexClient {
    sets: Arc<DashMap<IndexId, BTreeSet<Vec<u8>>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Border {
    Unbounded,
    Included(Vec<u8>),
    Excluded(Vec<u8>),
}

impl MemoryLexClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self, command: LexCommand) -> Reply {
        match command {
            LexCommand::RangeByLex {
                index,
                min,
                max,
                limit,
            } => self.range_by_lex(index, &min, &max, limit),
            LexCommand::Add { index, member } => {
                let added = self.sets.entry(index).or_default().insert(member);
                Reply::Integer(if added { 1 } else { 0 })
            }
            LexCommand::RemRangeByLex { index, min, max } => self.rem_range(index, &min, &max),
        }
    }

    fn range_by_lex(&self, index: IndexId, min: &[u8], max: &[u8], limit: usize) -> Reply {
        let (min, max) = match parse_range(min, max) {
            Ok(borders) => borders,
            Err(message) => return Reply::Error(message),
        };
        let Some(set) = self.sets.get(&index) else {
            return Reply::Array(Vec::new());
        };
        let members = scan_range(&set, &min, &max)
            .take(limit)
            .map(|member| Reply::Bytes(member.clone()))
            .collect();
        Reply::Array(members)
    }

    fn rem_range(&self, index: IndexId, min: &[u8], max: &[u8]) -> Reply {
        let (min, max) = match parse_range(min, max) {
            Ok(borders) => borders,
            Err(message) => return Reply::Error(message),
        };
        let Some(mut set) = self.sets.get_mut(&index) else {
            return Reply::Integer(0);
        };
        let doomed: Vec<Vec<u8>> = scan_range(&set, &min, &max).cloned().collect();
        for member in &doomed {
            set.remove(member);
        }
        Reply::Integer(doomed.len() as i64)
    }
}

fn parse_range(min: &[u8], max: &[u8]) -> Result<(Border, Border), String> {
    Ok((parse_border(min, false)?, parse_border(max, true)?))
}

fn parse_border(raw: &[u8], upper: bool) -> Result<Border, String> {
    match raw.first() {
        Some(b'[') => Ok(Border::Included(raw[1..].to_vec())),
        Some(b'(') => Ok(Border::Excluded(raw[1..].to_vec())),
        Some(b'-') if raw.len() == 1 && !upper => Ok(Border::Unbounded),
        Some(b'+') if raw.len() == 1 && upper => Ok(Border::Unbounded),
        _ => Err("malformed lex range border".to_string()),
    }
}

fn scan_range<'a>(
    set: &'a BTreeSet<Vec<u8>>,
    min: &Border,
    max: &Border,
) -> impl Iterator<Item = &'a Vec<u8>> {
    let empty = range_is_empty(min, max);
    let bounds = (to_bound(min), to_bound(max));
    let mut range = if empty { None } else { Some(set.range::<Vec<u8>, _>(bounds)) };
    std::iter::from_fn(move || range.as_mut()?.next())
}

// BTreeSet::range panics on inverted bounds; redis returns an empty set.
fn range_is_empty(min: &Border, max: &Border) -> bool {
    let (lo, lo_open) = match min {
        Border::Unbounded => return false,
        Border::Included(key) => (key, false),
        Border::Excluded(key) => (key, true),
    };
    let (hi, hi_open) = match max {
        Border::Unbounded => return false,
        Border::Included(key) => (key, false),
        Border::Excluded(key) => (key, true),
    };
    lo > hi || (lo == hi && (lo_open || hi_open))
}

fn to_bound(border: &Border) -> Bound<Vec<u8>> {
    match border {
        Border::Unbounded => Bound::Unbounded,
        Border::Included(key) => Bound::Included(key.clone()),
        Border::Excluded(key) => Bound::Excluded(key.clone()),
    }
}

#[derive(Clone)]
pub struct RedisLexClient {
    manager: redis::aio::ConnectionManager,
}

impl RedisLexClient {
    pub async fn new(url: &str) -> Result<Self, String> {
        let client = redis::Client::open(url).map_err(|err| format!("redis error: {err}"))?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|err| format!("redis connect failed: {err}"))?;
        Ok(Self { manager })
    }

    async fn issue(&self, command: LexCommand) -> Result<Reply, String> {
        let mut conn = self.manager.clone();
        let cmd = build_command(command);
        let value = cmd
            .query_async::<redis::Value>(&mut conn)
            .await
            .map_err(|err| format!("redis command failed: {err}"))?;
        Ok(convert_value(value))
    }
}

fn build_command(command: LexCommand) -> redis::Cmd {
    match command {
        LexCommand::RangeByLex {
            index,
            min,
            max,
            limit,
        } => {
            let mut cmd = redis::cmd("ZRANGEBYLEX");
            cmd.arg(&index.to_be_bytes()[..])
                .arg(min)
                .arg(max)
                .arg("LIMIT")
                .arg(0)
                .arg(limit);
            cmd
        }
        LexCommand::Add { index, member } => {
            let mut cmd = redis::cmd("ZADD");
            cmd.arg(&index.to_be_bytes()[..]).arg(0).arg(member);
            cmd
        }
        LexCommand::RemRangeByLex { index, min, max } => {
            let mut cmd = redis::cmd("ZREMRANGEBYLEX");
            cmd.arg(&index.to_be_bytes()[..]).arg(min).arg(max);
            cmd
        }
    }
}

fn convert_value(value: redis::Value) -> Reply {
    match value {
        redis::Value::Nil => Reply::Nil,
        redis::Value::Int(number) => Reply::Integer(number),
        redis::Value::BulkString(data) => Reply::Bytes(data),
        redis::Value::Array(items) => {
            Reply::Array(items.into_iter().map(convert_value).collect())
        }
        redis::Value::SimpleString(status) => Reply::Status(status),
        redis::Value::Okay => Reply::Status("OK".to_string()),
        other => Reply::Error(format!("unexpected reply shape: {other:?}")),
    }
}
