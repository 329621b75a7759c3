// src/physics/mod.rs
pub mod geometry;
pub mod lattice;
pub mod mosaic;
pub mod structure_factors;
