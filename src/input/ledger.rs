//! Record of input the controller injected, so the safety monitor can tell our own
//! events apart from the operator's.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::keys::Key;

const LEDGER_CAPACITY: usize = 128;
const POINTER_HISTORY: usize = 64;

/// One injected pointer move. `seq` grows with every move, so repeated moves to the
/// same spot stay distinguishable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerMove {
    pub seq: u64,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Default)]
struct LedgerInner {
    pointer: VecDeque<PointerMove>,
    keys: VecDeque<(Key, bool, Instant)>,
}

#[derive(Debug, Default)]
pub struct InjectionLedger {
    inner: Mutex<LedgerInner>,
}

impl InjectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_key(&self, key: &Key, pressed: bool) {
        let mut inner = self.lock();
        if inner.keys.len() == LEDGER_CAPACITY {
            inner.keys.pop_front();
        }
        inner.keys.push_back((key.clone(), pressed, Instant::now()));
    }

    pub fn record_pointer(&self, x: i32, y: i32) {
        let mut inner = self.lock();
        let seq = inner.pointer.back().map_or(1, |prev| prev.seq + 1);
        if inner.pointer.len() == POINTER_HISTORY {
            inner.pointer.pop_front();
        }
        inner.pointer.push_back(PointerMove { seq, x, y });
    }

    /// Remembered moves newer than `seq`, oldest first.
    pub fn pointer_moves_since(&self, seq: u64) -> Vec<PointerMove> {
        self.lock()
            .pointer
            .iter()
            .filter(|m| m.seq > seq)
            .copied()
            .collect()
    }

    /// True (and consumed) when a matching event was injected within `window`.
    pub fn claim_key(&self, key: &Key, pressed: bool, window: Duration) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();
        while let Some((_, _, at)) = inner.keys.front() {
            if now.duration_since(*at) > window {
                inner.keys.pop_front();
            } else {
                break;
            }
        }
        let found = inner
            .keys
            .iter()
            .position(|(k, p, _)| k == key && *p == pressed);
        match found {
            Some(idx) => {
                inner.keys.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_each_injected_event_once() {
        let ledger = InjectionLedger::new();
        let w = Key::Keyboard("w".into());
        ledger.record_key(&w, true);
        assert!(ledger.claim_key(&w, true, Duration::from_secs(1)));
        assert!(!ledger.claim_key(&w, true, Duration::from_secs(1)));
        assert!(!ledger.claim_key(&w, false, Duration::from_secs(1)));
    }

    #[test]
    fn repeated_pointer_moves_get_new_sequence_numbers() {
        let ledger = InjectionLedger::new();
        assert!(ledger.pointer_moves_since(0).is_empty());
        ledger.record_pointer(5, 5);
        ledger.record_pointer(5, 5);
        ledger.record_pointer(9, 1);
        assert_eq!(
            ledger.pointer_moves_since(1),
            vec![
                PointerMove { seq: 2, x: 5, y: 5 },
                PointerMove { seq: 3, x: 9, y: 1 },
            ]
        );
    }

    #[test]
    fn pointer_history_is_bounded() {
        let ledger = InjectionLedger::new();
        for i in 0..(POINTER_HISTORY as i32 + 10) {
            ledger.record_pointer(i, i);
        }
        let moves = ledger.pointer_moves_since(0);
        assert_eq!(moves.len(), POINTER_HISTORY);
        assert_eq!(moves[0].seq, 11);
    }

    #[test]
    fn expired_events_are_not_claimed() {
        let ledger = InjectionLedger::new();
        let w = Key::Keyboard("w".into());
        ledger.record_key(&w, true);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!ledger.claim_key(&w, true, Duration::from_millis(1)));
    }
}
