//! Mine selection and date window that parameterize the next submission batch.

use crate::model::{DateRange, MineId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("mine {index} is out of range (0..{count})")]
    OutOfRange { index: MineId, count: usize },
}

/// Boolean flag per mine over a fixed universe, plus the processing window.
///
/// Nothing here validates date ordering or that anything is selected; that is left
/// to whoever starts a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionState {
    selected: Vec<bool>,
    date_range: DateRange,
}

impl SelectionState {
    pub fn new(mine_count: usize, date_range: DateRange) -> Self {
        Self {
            selected: vec![false; mine_count],
            date_range,
        }
    }

    /// Flip one mine's flag and return its new value.
    pub fn toggle_mine(&mut self, index: MineId) -> Result<bool, SelectionError> {
        let count = self.selected.len();
        let flag = self
            .selected
            .get_mut(index as usize)
            .ok_or(SelectionError::OutOfRange { index, count })?;
        *flag = !*flag;
        Ok(*flag)
    }

    /// Deselect everything if all mines are selected, otherwise select all.
    pub fn toggle_select_all(&mut self) {
        let next = !self.all_selected();
        self.selected.iter_mut().for_each(|s| *s = next);
    }

    pub fn all_selected(&self) -> bool {
        self.selected.iter().all(|s| *s)
    }

    /// Selected mine indices in ascending order.
    pub fn selected_mines(&self) -> Vec<MineId> {
        self.selected
            .iter()
            .enumerate()
            .filter(|(_, s)| **s)
            .map(|(i, _)| i as MineId)
            .collect()
    }

    /// Replace both bounds at once.
    pub fn set_date_range(&mut self, date_range: DateRange) {
        self.date_range = date_range;
    }

    pub fn date_range(&self) -> &DateRange {
        &self.date_range
    }
}
