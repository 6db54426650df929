//! On-disk formats
//!
//! - `frame`: length + CRC32 framing shared by every append-only file,
//!   plus write-fsync-rename replacement for small metadata files
//! - `watermark`: per-source `(lwm, hwm)` record of a watermark registry

pub mod frame;
pub mod watermark;

pub use frame::{
    decode_frame, encode_frame, scan_frames, write_atomic, FrameRead, FrameScan, FRAME_OVERHEAD,
};
pub use watermark::{
    decode_water_marks, encode_water_marks, read_water_marks, write_water_marks, WaterMarkEntry,
    WatermarkError, WATERMARK_FORMAT_VERSION, WATERMARK_MAGIC,
};
