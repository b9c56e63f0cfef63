//! Host-side inputs and the bookkeeping records the renderer keeps per scene object.

pub mod light;
pub mod mesh;
pub mod model;
pub mod texture;
pub mod vertex;
