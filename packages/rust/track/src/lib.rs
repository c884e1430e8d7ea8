//! Track export: polyline decoding, section merging and GPX output.

mod format;
mod gpx;
mod merge;

pub use format::{fmt_hms, fmt_km, fmt_lat_lng, fmt_min};
pub use gpx::{
    GpxDocument, build_gpx, escape_xml, generate_filename, sanitize_title, title_routes,
    track_description, track_name, track_title,
};
pub use merge::{
    MergedTrack, SEAM_TOLERANCE, SectionDecodeError, append_no_dupes, decimate, decode_section,
    merge_sections,
};
