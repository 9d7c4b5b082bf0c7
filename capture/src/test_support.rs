use std::fmt;
use std::sync::{Arc, Mutex};

use frame_snap_common::bridge::Frame;
use frame_snap_common::frame::{ImageMessage, RawImage};
use image::{Rgb, RgbImage};
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Records every event emitted through the dispatch it hands out.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    pub fn dispatch(&self) -> Dispatch {
        Dispatch::new(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn count(&self, level: Level) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

pub fn solid_frame(rgb: [u8; 3], seq: u64) -> Frame {
    Frame {
        image: RgbImage::from_pixel(8, 6, Rgb(rgb)),
        captured_at_ms: 1708300000000 + seq as i64,
        seq,
    }
}

/// Serialized `bgr8` bus payload of a solid-colour image.
pub fn solid_payload(rgb: [u8; 3], width: u32, height: u32, seq: u64) -> Vec<u8> {
    let bgr = [rgb[2], rgb[1], rgb[0]];
    let data = bgr.repeat((width * height) as usize);
    ImageMessage::new_raw(
        RawImage {
            encoding: "bgr8".into(),
            width,
            height,
            step: width * 3,
            is_bigendian: false,
            data,
        },
        1708300000000 + seq as i64,
        seq,
    )
    .serialize()
    .unwrap()
}
