//! Data module: buffered row storage.

pub mod flex_table;

pub use flex_table::{BufferedArray, FlexList, FlexTable, Remap};
