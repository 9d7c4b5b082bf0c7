use chrono::NaiveDateTime;

/// File name for a saved photo, e.g. `photo_007_20260218_093000.jpg`.
///
/// The counter keeps names unique when several photos land in the same second.
pub fn photo_filename(counter: u32, taken_at: NaiveDateTime) -> String {
    format!(
        "photo_{counter:03}_{ts}.jpg",
        ts = taken_at.format("%Y%m%d_%H%M%S")
    )
}
