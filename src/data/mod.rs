//! Record layer: data items, the data manager and its item cache.

pub mod item;
mod manager;

pub use item::{DataItem, ItemMutation};
pub use manager::{DataManager, ItemLoader};
