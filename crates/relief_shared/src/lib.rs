pub mod config;
pub mod coords;
pub mod curve;
pub mod falloff;
pub mod grid;
pub mod heightmap;
pub mod lod;
pub mod mesh;
pub mod noise_field;
pub mod preview;
