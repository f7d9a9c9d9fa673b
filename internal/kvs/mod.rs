use futures_util::future::join_all;

pub mod client;
pub(crate) mod encoding;

pub use client::{IndexId, LexClient};

use client::{LexCommand, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Found,
    NotFound,
    Failed,
}

// A batch that saw any malformed or failed reply reports a synthetic timeout,
// the same way a lost network round trip would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Stable,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub slots: Vec<T>,
    pub outcome: BatchOutcome,
}

impl<T> Batch<T> {
    pub fn is_stable(&self) -> bool {
        self.outcome == BatchOutcome::Stable
    }
}

impl Batch<ReadSlot> {
    pub fn any_found(&self) -> bool {
        self.slots.iter().any(|slot| slot.status == SlotStatus::Found)
    }

    // Batch-level code: not-found unless at least one key resolved.
    pub fn status(&self) -> SlotStatus {
        match self.outcome {
            BatchOutcome::TimedOut => SlotStatus::Failed,
            BatchOutcome::Stable if self.any_found() => SlotStatus::Found,
            BatchOutcome::Stable => SlotStatus::NotFound,
        }
    }
}

impl Batch<PairSlot> {
    pub fn found_pairs(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.slots
            .iter()
            .filter(|slot| slot.status == SlotStatus::Found)
            .map(|slot| (slot.key.clone(), slot.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ReadSlot {
    pub status: SlotStatus,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct PairSlot {
    pub status: SlotStatus,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl PairSlot {
    fn empty() -> Self {
        Self {
            status: SlotStatus::NotFound,
            key: Vec::new(),
            value: Vec::new(),
        }
    }
}

// Reply bookkeeping for one fanned-out operation. The operation finalizes
// exactly once, when every scheduled command has reported back.
struct FanOut {
    async_ops_cnt: usize,
    replies_cnt: usize,
    had_error: bool,
    finalized: bool,
}

impl FanOut {
    fn new(async_ops_cnt: usize) -> Self {
        Self {
            async_ops_cnt,
            replies_cnt: 0,
            had_error: false,
            finalized: false,
        }
    }

    fn record_reply(&mut self, errored: bool) {
        debug_assert!(self.replies_cnt < self.async_ops_cnt);
        self.replies_cnt += 1;
        if errored {
            self.had_error = true;
        }
    }

    fn try_finalize(&mut self) -> Option<BatchOutcome> {
        if self.replies_cnt < self.async_ops_cnt {
            return None;
        }
        debug_assert!(!self.finalized);
        self.finalized = true;
        if self.had_error {
            Some(BatchOutcome::TimedOut)
        } else {
            Some(BatchOutcome::Stable)
        }
    }
}

#[derive(Clone)]
pub struct IndexKvs {
    client: LexClient,
}

impl IndexKvs {
    pub fn new(client: LexClient) -> Self {
        Self { client }
    }

    pub async fn read(&self, index: IndexId, keys: &[Vec<u8>]) -> Batch<ReadSlot> {
        let mut fan = FanOut::new(keys.len());
        let lookups = keys.iter().map(|key| self.read_one(index, key));
        let replies = join_all(lookups).await;
        let mut slots = Vec::with_capacity(replies.len());
        for (slot, errored) in replies {
            fan.record_reply(errored);
            slots.push(slot);
        }
        let outcome = fan.try_finalize().unwrap_or(BatchOutcome::TimedOut);
        Batch { slots, outcome }
    }

    async fn read_one(&self, index: IndexId, key: &[u8]) -> (ReadSlot, bool) {
        let command = LexCommand::RangeByLex {
            index,
            min: encoding::key_lower_border(key),
            max: encoding::key_upper_border(key),
            limit: 1,
        };
        match self.client.issue(command).await {
            Ok(reply) => interpret_point_reply(reply),
            Err(err) => {
                tracing::warn!(error = %err, "index point lookup failed");
                (failed_read_slot(), true)
            }
        }
    }

    // `start` ownership moves into the operation; the first returned member is
    // dropped when its key equals the consumed start key.
    pub async fn next(
        &self,
        index: IndexId,
        start: Option<Vec<u8>>,
        count: usize,
    ) -> Batch<PairSlot> {
        let mut fan = FanOut::new(1);
        let skip_value = start.filter(|key| !key.is_empty());
        let command = match &skip_value {
            Some(key) => LexCommand::RangeByLex {
                index,
                min: encoding::after_key_border(key),
                max: encoding::RANGE_MAX.to_vec(),
                limit: count + 1,
            },
            None => LexCommand::RangeByLex {
                index,
                min: encoding::RANGE_MIN.to_vec(),
                max: encoding::RANGE_MAX.to_vec(),
                limit: count,
            },
        };
        let (slots, errored) = match self.client.issue(command).await {
            Ok(reply) => interpret_next_reply(reply, skip_value.as_deref(), count),
            Err(err) => {
                tracing::warn!(error = %err, "index range scan failed");
                (vec![PairSlot::empty(); count], true)
            }
        };
        fan.record_reply(errored);
        let outcome = fan.try_finalize().unwrap_or(BatchOutcome::TimedOut);
        Batch { slots, outcome }
    }

    pub async fn write(&self, index: IndexId, pairs: &[(Vec<u8>, Vec<u8>)]) -> Batch<SlotStatus> {
        let mut fan = FanOut::new(pairs.len());
        let writes = pairs.iter().map(|(key, value)| self.write_one(index, key, value));
        let replies = join_all(writes).await;
        let mut slots = Vec::with_capacity(replies.len());
        for (status, errored) in replies {
            fan.record_reply(errored);
            slots.push(status);
        }
        let outcome = fan.try_finalize().unwrap_or(BatchOutcome::TimedOut);
        Batch { slots, outcome }
    }

    async fn write_one(&self, index: IndexId, key: &[u8], value: &[u8]) -> (SlotStatus, bool) {
        // Members concatenate key and value, so an update must first clear any
        // member sharing the key prefix. Only the add drives the result code.
        let delete = LexCommand::RemRangeByLex {
            index,
            min: encoding::key_lower_border(key),
            max: encoding::key_upper_border(key),
        };
        if let Err(err) = self.client.issue(delete).await {
            tracing::warn!(error = %err, "pre-write delete failed");
        }
        let add = LexCommand::Add {
            index,
            member: encoding::member(key, value),
        };
        match self.client.issue(add).await {
            Ok(reply) => interpret_status_reply(reply),
            Err(err) => {
                tracing::warn!(error = %err, "index write failed");
                (SlotStatus::Failed, true)
            }
        }
    }

    pub async fn delete(&self, index: IndexId, keys: &[Vec<u8>]) -> Batch<SlotStatus> {
        let mut fan = FanOut::new(keys.len());
        let deletes = keys.iter().map(|key| self.delete_one(index, key));
        let replies = join_all(deletes).await;
        let mut slots = Vec::with_capacity(replies.len());
        for (status, errored) in replies {
            fan.record_reply(errored);
            slots.push(status);
        }
        let outcome = fan.try_finalize().unwrap_or(BatchOutcome::TimedOut);
        Batch { slots, outcome }
    }

    async fn delete_one(&self, index: IndexId, key: &[u8]) -> (SlotStatus, bool) {
        let command = LexCommand::RemRangeByLex {
            index,
            min: encoding::key_lower_border(key),
            max: encoding::key_upper_border(key),
        };
        match self.client.issue(command).await {
            Ok(reply) => interpret_status_reply(reply),
            Err(err) => {
                tracing::warn!(error = %err, "index delete failed");
                (SlotStatus::Failed, true)
            }
        }
    }
}

fn failed_read_slot() -> ReadSlot {
    ReadSlot {
        status: SlotStatus::Failed,
        value: None,
    }
}

fn not_found_read_slot() -> ReadSlot {
    ReadSlot {
        status: SlotStatus::NotFound,
        value: None,
    }
}

fn interpret_point_reply(reply: Reply) -> (ReadSlot, bool) {
    let member = match reply {
        Reply::Nil => return (not_found_read_slot(), false),
        Reply::Bytes(member) => member,
        Reply::Array(items) => {
            if items.is_empty() {
                return (not_found_read_slot(), false);
            }
            if items.len() > 1 {
                tracing::error!(
                    elements = items.len(),
                    "point lookup returned more than one member"
                );
                return (failed_read_slot(), true);
            }
            match items.into_iter().next() {
                Some(Reply::Bytes(member)) => member,
                _ => return (failed_read_slot(), true),
            }
        }
        _ => return (failed_read_slot(), true),
    };
    match encoding::split_member(&member) {
        Some((_, value)) => (
            ReadSlot {
                status: SlotStatus::Found,
                value: Some(value.to_vec()),
            },
            false,
        ),
        None => (failed_read_slot(), true),
    }
}

fn interpret_next_reply(
    reply: Reply,
    skip_value: Option<&[u8]>,
    count: usize,
) -> (Vec<PairSlot>, bool) {
    let mut slots = vec![PairSlot::empty(); count];
    let members = match reply {
        Reply::Nil => return (slots, false),
        Reply::Bytes(member) => vec![member],
        Reply::Array(items) => {
            let mut members = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Reply::Bytes(member) => members.push(member),
                    _ => return (slots, true),
                }
            }
            members
        }
        _ => return (slots, true),
    };

    let mut result_idx = 0;
    for (member_idx, member) in members.iter().enumerate() {
        let Some((key, value)) = encoding::split_member(member) else {
            return (slots, true);
        };
        if member_idx == 0 && skip_value == Some(key) {
            continue;
        }
        if result_idx >= count {
            break;
        }
        slots[result_idx] = PairSlot {
            status: SlotStatus::Found,
            key: key.to_vec(),
            value: value.to_vec(),
        };
        result_idx += 1;
    }
    (slots, false)
}

fn interpret_status_reply(reply: Reply) -> (SlotStatus, bool) {
    match reply {
        Reply::Status(_) => (SlotStatus::Found, false),
        Reply::Integer(number) if number > 0 => (SlotStatus::Found, false),
        Reply::Integer(_) => (SlotStatus::NotFound, false),
        Reply::Nil => (SlotStatus::NotFound, false),
        _ => (SlotStatus::Failed, true),
    }
}
