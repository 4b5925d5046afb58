//! B+Tree node format.
//!
//! ```text
//! +--------+----------+------------+-----------------+-----------------+-----
//! | leaf:1 | nkeys:2  | sibling:8  | son 0 | key 0   | son 1 | key 1   | ...
//! +--------+----------+------------+-----------------+-----------------+-----
//! ```
//!
//! Room for `2 * BALANCE + 2` son/key pairs. A node splits once it holds
//! `2 * BALANCE` keys. In a leaf, `son k` is the record indexed under
//! `key k`. In an interior node, `key k` is the exclusive upper bound of
//! `son k`'s subtree, and the last key of the rightmost node on a level is
//! `i64::MAX`.

use crate::types::Uid;

pub const BALANCE: usize = 3;

const OFFSET_LEAF: usize = 0;
const OFFSET_KEY_COUNT: usize = OFFSET_LEAF + 1;
const OFFSET_SIBLING: usize = OFFSET_KEY_COUNT + 2;
const HEADER_SIZE: usize = OFFSET_SIBLING + 8;

const SLOT_SIZE: usize = 16;
const SLOTS: usize = BALANCE * 2 + 2;

/// Size of a node record's payload
pub const NODE_SIZE: usize = HEADER_SIZE + SLOT_SIZE * SLOTS;

fn slot(kth: usize) -> usize {
    HEADER_SIZE + kth * SLOT_SIZE
}

fn read_u64(raw: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

pub fn is_leaf(raw: &[u8]) -> bool {
    raw[OFFSET_LEAF] == 1
}

pub fn set_leaf(raw: &mut [u8], leaf: bool) {
    raw[OFFSET_LEAF] = leaf as u8;
}

pub fn key_count(raw: &[u8]) -> usize {
    u16::from_be_bytes([raw[OFFSET_KEY_COUNT], raw[OFFSET_KEY_COUNT + 1]]) as usize
}

pub fn set_key_count(raw: &mut [u8], count: usize) {
    raw[OFFSET_KEY_COUNT..OFFSET_KEY_COUNT + 2].copy_from_slice(&(count as u16).to_be_bytes());
}

pub fn sibling(raw: &[u8]) -> Uid {
    Uid(read_u64(raw, OFFSET_SIBLING))
}

pub fn set_sibling(raw: &mut [u8], sibling: Uid) {
    raw[OFFSET_SIBLING..OFFSET_SIBLING + 8].copy_from_slice(&sibling.value().to_be_bytes());
}

pub fn son(raw: &[u8], kth: usize) -> Uid {
    Uid(read_u64(raw, slot(kth)))
}

pub fn set_son(raw: &mut [u8], kth: usize, son: Uid) {
    let at = slot(kth);
    raw[at..at + 8].copy_from_slice(&son.value().to_be_bytes());
}

pub fn key(raw: &[u8], kth: usize) -> i64 {
    read_u64(raw, slot(kth) + 8) as i64
}

pub fn set_key(raw: &mut [u8], kth: usize, key: i64) {
    let at = slot(kth) + 8;
    raw[at..at + 8].copy_from_slice(&key.to_be_bytes());
}

/// Move slots `kth..` one position right; the last slot falls off.
fn shift_from(raw: &mut [u8], kth: usize) {
    raw.copy_within(slot(kth)..slot(SLOTS - 1), slot(kth + 1));
}

/// Empty leaf, the root of a new tree
pub fn new_nil_root_raw() -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, true);
    raw
}

/// Interior root over `left` (keys below `key`) and `right`
pub fn new_root_raw(left: Uid, right: Uid, key: i64) -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, false);
    set_key_count(&mut raw, 2);
    set_son(&mut raw, 0, left);
    set_key(&mut raw, 0, key);
    set_son(&mut raw, 1, right);
    set_key(&mut raw, 1, i64::MAX);
    raw
}

/// Where a descent goes next from an interior node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchNext {
    Child(Uid),
    /// The key lies beyond this node; its range moved right in a split
    Sibling(Uid),
}

/// Route for inserting `target`: the first son whose bound exceeds it
pub fn search_next(raw: &[u8], target: i64) -> SearchNext {
    route(raw, |bound| target < bound)
}

/// Route to the leftmost son that may hold `target`. Equal keys can sit on
/// both sides of a split, so a range scan starts here and walks siblings.
pub fn search_first(raw: &[u8], target: i64) -> SearchNext {
    route(raw, |bound| target <= bound)
}

fn route(raw: &[u8], takes: impl Fn(i64) -> bool) -> SearchNext {
    let count = key_count(raw);
    if let Some(kth) = (0..count).find(|&k| takes(key(raw, k))) {
        return SearchNext::Child(son(raw, kth));
    }

    let right = sibling(raw);
    if right.is_none() && count > 0 {
        // rightmost node of its level: only `i64::MAX` itself lands here
        return SearchNext::Child(son(raw, count - 1));
    }
    SearchNext::Sibling(right)
}

/// Records of a leaf with keys in `[lo, hi]`, plus the sibling to continue
/// with if the range may extend past this leaf.
pub fn leaf_range(raw: &[u8], lo: i64, hi: i64) -> (Vec<Uid>, Option<Uid>) {
    let count = key_count(raw);
    let mut kth = (0..count).find(|&k| key(raw, k) >= lo).unwrap_or(count);

    let mut uids = Vec::new();
    while kth < count && key(raw, kth) <= hi {
        uids.push(son(raw, kth));
        kth += 1;
    }

    let next = sibling(raw);
    let continue_at = (kth == count && !next.is_none()).then_some(next);
    (uids, continue_at)
}

/// Insert `(son, key)` in key order. Returns false if the key belongs to a
/// right sibling; the node is then untouched.
pub fn insert(raw: &mut [u8], new_son: Uid, new_key: i64) -> bool {
    let count = key_count(raw);
    let kth = (0..count)
        .find(|&k| key(raw, k) >= new_key)
        .unwrap_or(count);
    if kth == count && !sibling(raw).is_none() {
        return false;
    }

    if is_leaf(raw) {
        shift_from(raw, kth);
        set_key(raw, kth, new_key);
        set_son(raw, kth, new_son);
    } else {
        // son kth keeps the lower part of its range; the new son takes
        // over the old upper bound
        let upper = key(raw, kth);
        set_key(raw, kth, new_key);
        shift_from(raw, kth + 1);
        set_key(raw, kth + 1, upper);
        set_son(raw, kth + 1, new_son);
    }
    set_key_count(raw, count + 1);
    true
}

pub fn needs_split(raw: &[u8]) -> bool {
    key_count(raw) == BALANCE * 2
}

/// Build the right half of a full node. The caller stores it, then calls
/// [`finish_split`] on the full node with the new node's uid.
pub fn split_right_half(raw: &[u8]) -> Vec<u8> {
    let mut right = vec![0u8; NODE_SIZE];
    set_leaf(&mut right, is_leaf(raw));
    set_key_count(&mut right, BALANCE);
    set_sibling(&mut right, sibling(raw));
    let from = slot(BALANCE);
    right[HEADER_SIZE..HEADER_SIZE + (NODE_SIZE - from)].copy_from_slice(&raw[from..]);
    right
}

pub fn finish_split(raw: &mut [u8], right: Uid) {
    set_key_count(raw, BALANCE);
    set_sibling(raw, right);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(keys: &[i64]) -> Vec<u8> {
        let mut raw = new_nil_root_raw();
        for &k in keys {
            assert!(insert(&mut raw, Uid(k as u64 * 10), k));
        }
        raw
    }

    #[test]
    fn test_node_size() {
        assert_eq!(NODE_SIZE, 11 + 16 * 8);
    }

    #[test]
    fn test_leaf_insert_keeps_order() {
        let raw = leaf_with(&[5, 1, 3]);
        assert_eq!(key_count(&raw), 3);
        assert_eq!((0..3).map(|k| key(&raw, k)).collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(son(&raw, 1), Uid(30));
    }

    #[test]
    fn test_insert_redirects_past_sibling() {
        let mut raw = leaf_with(&[1, 2]);
        set_sibling(&mut raw, Uid(99));
        assert!(!insert(&mut raw, Uid(1), 7));
        assert_eq!(key_count(&raw), 2);
        // keys inside the range still land here
        assert!(insert(&mut raw, Uid(1), 0));
    }

    #[test]
    fn test_interior_insert_splits_range() {
        let mut raw = new_root_raw(Uid(100), Uid(200), 50);
        assert!(insert(&mut raw, Uid(300), 80));

        assert_eq!(key_count(&raw), 3);
        assert_eq!((son(&raw, 0), key(&raw, 0)), (Uid(100), 50));
        assert_eq!((son(&raw, 1), key(&raw, 1)), (Uid(200), 80));
        assert_eq!((son(&raw, 2), key(&raw, 2)), (Uid(300), i64::MAX));

        assert_eq!(search_next(&raw, 10), SearchNext::Child(Uid(100)));
        assert_eq!(search_next(&raw, 50), SearchNext::Child(Uid(200)));
        assert_eq!(search_next(&raw, 80), SearchNext::Child(Uid(300)));
        assert_eq!(search_next(&raw, i64::MAX), SearchNext::Child(Uid(300)));
    }

    #[test]
    fn test_search_first_takes_left_of_equal_bound() {
        let raw = new_root_raw(Uid(100), Uid(200), 50);
        assert_eq!(search_first(&raw, 49), SearchNext::Child(Uid(100)));
        assert_eq!(search_first(&raw, 50), SearchNext::Child(Uid(100)));
        assert_eq!(search_first(&raw, 51), SearchNext::Child(Uid(200)));
        assert_eq!(search_first(&raw, i64::MAX), SearchNext::Child(Uid(200)));

        let mut moved = new_root_raw(Uid(100), Uid(200), 50);
        set_key(&mut moved, 1, 90);
        set_sibling(&mut moved, Uid(300));
        assert_eq!(search_first(&moved, 91), SearchNext::Sibling(Uid(300)));
    }

    #[test]
    fn test_split_halves() {
        let mut raw = leaf_with(&[1, 2, 3, 4, 5, 6]);
        assert!(needs_split(&raw));

        let right = split_right_half(&raw);
        finish_split(&mut raw, Uid(777));

        assert_eq!(key_count(&raw), 3);
        assert_eq!(sibling(&raw), Uid(777));
        assert_eq!(key_count(&right), 3);
        assert!(is_leaf(&right));
        assert_eq!(key(&right, 0), 4);
        assert_eq!(son(&right, 2), Uid(60));
        assert!(sibling(&right).is_none());
    }

    #[test]
    fn test_leaf_range() {
        let mut raw = leaf_with(&[2, 4, 6]);
        assert_eq!(leaf_range(&raw, 3, 5), (vec![Uid(40)], None));
        assert_eq!(leaf_range(&raw, 0, 100), (vec![Uid(20), Uid(40), Uid(60)], None));

        set_sibling(&mut raw, Uid(5));
        // range may continue into the sibling
        assert_eq!(leaf_range(&raw, 5, 100), (vec![Uid(60)], Some(Uid(5))));
        assert_eq!(leaf_range(&raw, 1, 3), (vec![Uid(20)], None));
    }
}
