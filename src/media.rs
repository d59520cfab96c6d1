pub mod clock;
pub mod demuxer;
pub mod packet;
pub mod player;
pub mod queue;
pub mod reader;
pub mod scheduler;
pub mod slot;
pub mod sync;
