pub(crate) const RANGE_MIN: &[u8] = b"-";
pub(crate) const RANGE_MAX: &[u8] = b"+";

// 0xFF never appears in UTF-8 text, so it terminates an inclusive key range.
pub(crate) const KEY_TERMINATOR: u8 = 0xFF;

const SEPARATOR: u8 = 0x00;

// A stored member is `key 0x00 value`. Keys must not contain 0x00.
pub(crate) fn member(key: &[u8], value: &[u8]) -> Vec<u8> {
    debug_assert!(!key.contains(&SEPARATOR));
    let mut out = Vec::with_capacity(key.len() + 1 + value.len());
    out.extend_from_slice(key);
    out.push(SEPARATOR);
    out.extend_from_slice(value);
    out
}

pub(crate) fn split_member(member: &[u8]) -> Option<(&[u8], &[u8])> {
    let sep = member.iter().position(|byte| *byte == SEPARATOR)?;
    Some((&member[..sep], &member[sep + 1..]))
}

// `[key` — inclusive lower bound covering every member prefixed by the key.
pub(crate) fn key_lower_border(key: &[u8]) -> Vec<u8> {
    border(b'[', key, false)
}

// `(key` — exclusive lower bound: strictly after every member of the key.
pub(crate) fn after_key_border(key: &[u8]) -> Vec<u8> {
    border(b'(', key, false)
}

// `(key 0xFF` — exclusive upper bound; `key 0x00 *` members sort below it.
pub(crate) fn key_upper_border(key: &[u8]) -> Vec<u8> {
    border(b'(', key, true)
}

fn border(marker: u8, key: &[u8], terminated: bool) -> Vec<u8> {
    debug_assert!(!key.contains(&SEPARATOR));
    debug_assert!(!key.contains(&KEY_TERMINATOR));
    let mut out = Vec::with_capacity(key.len() + 2);
    out.push(marker);
    out.extend_from_slice(key);
    if terminated {
        out.push(KEY_TERMINATOR);
    }
    out
}
