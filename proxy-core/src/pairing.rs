//! The shared pairing table: the one structure the Handshake and Forwarder
//! threads both touch. Stores only `Token -> Token` routing entries, never
//! the socket objects themselves (see `forwarder::Promote` for how the
//! sockets physically move threads).

use hashbrown::HashMap;
use mio::Token;
use std::sync::Mutex;

/// Process-wide map from connection handle to counterpart handle.
///
/// Invariants (I1/I2 in the spec): at every instant, for every entry
/// `a -> b` there exists `b -> a`, and no handle is a key in more than one
/// entry. Both invariants are maintained by only ever mutating the table
/// through `insert_pair`/`remove_pair`, which always touch both directions.
#[derive(Default)]
pub struct PairingTable {
    inner: Mutex<HashMap<Token, Token>>,
}

impl PairingTable {
    pub fn new() -> Self {
        PairingTable { inner: Mutex::new(HashMap::new()) }
    }

    /// Installs a symmetric pair `{a, b}`. O(1), no I/O performed while the
    /// lock is held.
    pub fn insert_pair(&self, a: Token, b: Token) {
        let mut table = self.inner.lock().unwrap();
        table.insert(a, b);
        table.insert(b, a);
    }

    /// Looks up the counterpart of `token`, if any.
    pub fn counterpart(&self, token: Token) -> Option<Token> {
        self.inner.lock().unwrap().get(&token).copied()
    }

    /// Removes both directed entries of the pair containing `token`, if a
    /// counterpart is still registered. Returns the counterpart that was
    /// removed, if any.
    pub fn remove_pair(&self, token: Token) -> Option<Token> {
        let mut table = self.inner.lock().unwrap();
        let counterpart = table.remove(&token)?;
        table.remove(&counterpart);
        Some(counterpart)
    }

    /// Number of paired connections currently tracked (both directions
    /// counted once each handle).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_pair_is_symmetric() {
        let table = PairingTable::new();
        table.insert_pair(Token(1), Token(2));

        assert_eq!(table.counterpart(Token(1)), Some(Token(2)));
        assert_eq!(table.counterpart(Token(2)), Some(Token(1)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn remove_pair_erases_both_directions() {
        let table = PairingTable::new();
        table.insert_pair(Token(1), Token(2));

        let removed = table.remove_pair(Token(1));

        assert_eq!(removed, Some(Token(2)));
        assert_eq!(table.counterpart(Token(1)), None);
        assert_eq!(table.counterpart(Token(2)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_pair_on_missing_token_is_noop() {
        let table = PairingTable::new();
        assert_eq!(table.remove_pair(Token(9)), None);
    }
}
