use std::collections::BTreeMap;

use tracing::warn;

use crate::error::EngineError;
use crate::types::{CloseConfirmation, Position, PositionState};

/// The account's known operations keyed by id. Every mutation here mirrors a
/// confirmed backend response; nothing is changed speculatively.
#[derive(Debug, Clone, Default)]
pub struct PositionSet {
    positions: BTreeMap<u64, Position>,
    revision: u64,
}

impl PositionSet {
    pub fn new() -> Self { Self::default() }

    /// Replace everything with an authoritative backend listing. Records that
    /// break the position invariants are skipped. Returns how many were kept.
    pub fn replace_all(&mut self, records: Vec<Position>) -> usize {
        let mut next = BTreeMap::new();
        for p in records {
            match p.validate() {
                Ok(()) => { next.insert(p.id, p); }
                Err(e) => warn!(target: "dashboard", "skipping operation from backend: {e}"),
            }
        }
        if next != self.positions {
            self.positions = next;
            self.bump();
        }
        self.positions.len()
    }

    /// Record an operation the backend has just confirmed as placed.
    pub fn insert_confirmed(&mut self, position: Position) -> Result<(), EngineError> {
        position.validate()?;
        self.positions.insert(position.id, position);
        self.bump();
        Ok(())
    }

    /// Open -> Closed. Only call with a confirmation from the backend.
    pub fn apply_close(&mut self, close: &CloseConfirmation) -> Result<&Position, EngineError> {
        let p = self
            .positions
            .get_mut(&close.operation_id)
            .ok_or(EngineError::UnknownOperation(close.operation_id))?;
        if p.state() == PositionState::Closed { return Err(EngineError::AlreadyClosed(p.id)); }
        p.is_closed = true;
        p.close_price = Some(close.close_price);
        p.realized_pnl = Some(close.realized_pnl);
        self.revision = self.revision.wrapping_add(1);
        Ok(p)
    }

    /// Apply confirmed take-profit / stop-loss levels to an open operation.
    pub fn apply_levels(&mut self, id: u64, take_profit: Option<f64>, stop_loss: Option<f64>) -> Result<&Position, EngineError> {
        let p = self.positions.get_mut(&id).ok_or(EngineError::UnknownOperation(id))?;
        if p.state() == PositionState::Closed { return Err(EngineError::AlreadyClosed(id)); }
        p.take_profit = take_profit;
        p.stop_loss = stop_loss;
        self.revision = self.revision.wrapping_add(1);
        Ok(p)
    }

    pub fn get(&self, id: u64) -> Option<&Position> { self.positions.get(&id) }

    pub fn open(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.state() == PositionState::Open)
    }

    pub fn closed(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.state() == PositionState::Closed)
    }

    pub fn all(&self) -> impl Iterator<Item = &Position> { self.positions.values() }

    pub fn len(&self) -> usize { self.positions.len() }

    pub fn is_empty(&self) -> bool { self.positions.is_empty() }

    pub fn revision(&self) -> u64 { self.revision }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.bump();
    }

    fn bump(&mut self) { self.revision = self.revision.wrapping_add(1); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseKind, Side};

    fn pos(id: u64) -> Position {
        Position {
            id,
            asset: "BTC-USDT".into(),
            side: Side::Buy,
            volume: 2.0,
            leverage: 10,
            entry_price: 100.0,
            close_price: None,
            take_profit: None,
            stop_loss: None,
            committed_margin: 20.0,
            is_closed: false,
            realized_pnl: None,
        }
    }

    fn close(id: u64) -> CloseConfirmation {
        CloseConfirmation { operation_id: id, close_price: 110.0, realized_pnl: 20.0, kind: CloseKind::Manual }
    }

    #[test]
    fn test_replace_all_skips_invalid() {
        let mut set = PositionSet::new();
        let mut bad = pos(2);
        bad.volume = -1.0;
        assert_eq!(set.replace_all(vec![pos(1), bad, pos(3)]), 2);
        assert!(set.get(2).is_none());
        assert_eq!(set.open().count(), 2);
    }

    #[test]
    fn test_replace_all_same_listing_keeps_revision() {
        let mut set = PositionSet::new();
        set.replace_all(vec![pos(1)]);
        let rev = set.revision();
        set.replace_all(vec![pos(1)]);
        assert_eq!(set.revision(), rev);
    }

    #[test]
    fn test_close_transition() {
        let mut set = PositionSet::new();
        set.insert_confirmed(pos(1)).unwrap();
        let closed = set.apply_close(&close(1)).unwrap();
        assert_eq!(closed.state(), PositionState::Closed);
        assert_eq!(closed.close_price, Some(110.0));
        assert_eq!(closed.realized_pnl, Some(20.0));
        assert_eq!(set.open().count(), 0);
        assert_eq!(set.closed().count(), 1);
    }

    #[test]
    fn test_close_is_terminal() {
        let mut set = PositionSet::new();
        set.insert_confirmed(pos(1)).unwrap();
        set.apply_close(&close(1)).unwrap();
        assert!(matches!(set.apply_close(&close(1)), Err(EngineError::AlreadyClosed(1))));
        assert!(matches!(set.apply_levels(1, Some(120.0), None), Err(EngineError::AlreadyClosed(1))));
    }

    #[test]
    fn test_close_unknown_operation_changes_nothing() {
        let mut set = PositionSet::new();
        set.insert_confirmed(pos(1)).unwrap();
        let rev = set.revision();
        assert!(matches!(set.apply_close(&close(99)), Err(EngineError::UnknownOperation(99))));
        assert_eq!(set.revision(), rev);
        assert_eq!(set.get(1), Some(&pos(1)));
    }

    #[test]
    fn test_insert_confirmed_validates() {
        let mut set = PositionSet::new();
        let mut bad = pos(1);
        bad.leverage = 0;
        assert!(set.insert_confirmed(bad).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_apply_levels() {
        let mut set = PositionSet::new();
        set.insert_confirmed(pos(1)).unwrap();
        let p = set.apply_levels(1, Some(130.0), Some(90.0)).unwrap();
        assert_eq!(p.take_profit, Some(130.0));
        assert_eq!(p.stop_loss, Some(90.0));
    }
}
