use std::ops::Range;

use tracing::debug;

use crate::data::EntityBars;

/// A ticker's contiguous block of rows inside the [`Dataset`] arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySlice {
    pub ticker: String,
    pub rows: Range<usize>,
}

impl EntitySlice {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Every ticker's closes merged into one flat column, tagged by ticker.
///
/// Tickers appear in input order and each owns one contiguous row range, so
/// per-ticker work is a loop over `entities()` slicing the shared column.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    entities: Vec<EntitySlice>,
    close: Vec<f64>,
}

impl Dataset {
    pub fn assemble(entities: Vec<EntityBars>) -> Self {
        let total: usize = entities.iter().map(|e| e.bars.len()).sum();
        let mut dataset = Self {
            entities: Vec::with_capacity(entities.len()),
            close: Vec::with_capacity(total),
        };

        for entity in entities {
            if entity.bars.is_empty() {
                debug!(ticker = %entity.ticker, "Skipping ticker without bars");
                continue;
            }
            let start = dataset.close.len();
            dataset
                .close
                .extend(entity.bars.iter().map(|bar| bar.close));
            dataset.entities.push(EntitySlice {
                ticker: entity.ticker,
                rows: start..dataset.close.len(),
            });
        }

        dataset
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn entities(&self) -> &[EntitySlice] {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    /// Closing prices of one ticker, in chronological order.
    pub fn entity_closes(&self, entity: &EntitySlice) -> &[f64] {
        &self.close[entity.rows.clone()]
    }
}
