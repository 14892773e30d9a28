pub mod chunk;
pub mod streamer;
pub mod workers;

pub use chunk::{ChunkPhase, LodMesh, TerrainChunk};
pub use streamer::{ChunkEvent, ChunkStreamer, StreamStats};
