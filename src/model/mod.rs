//src/model/mod.rs
pub mod elements;
pub mod structure;
pub mod unit_cell;

// Re-exports for cleaner imports
pub use structure::{Atom, Structure};
pub use unit_cell::{CellParam, CrystalSystem, UnitCell};
