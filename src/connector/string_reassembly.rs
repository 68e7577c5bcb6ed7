//! String datarefs are streamed one character per dataref: the simulator sends the
//!  character code at position `i` as the float value of `"{path}[{i}]"`. These are the
//!  pieces that put the characters back together.
//!
//! A fill cycle completes after exactly `buffer_size` character updates, no matter which
//!  positions they were for. A position that arrives twice in one cycle therefore pushes
//!  another position into the next cycle - an inherent property of the scheme that is
//!  not worth working around.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::connector::registry::SubscriptionHandle;
use crate::error::XPlaneError;

/// What a string subscriber gets to see when the assembled value changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringSnapshot {
    pub path: Arc<str>,
    pub buffer_size: usize,
    pub value: String,
}

pub type StringCallback = Arc<dyn Fn(&StringSnapshot) + Send + Sync>;

/// Every character is a dataref subscription of its own, so string buffers are bounded
pub const MAX_STRING_BUFFER_SIZE: usize = 1024;


/// The per-string state machine, free of locking and callbacks
#[derive(Debug)]
pub struct StringAssembler {
    buffer_size: usize,
    age_threshold: Duration,
    buffer: Vec<f32>,
    num_received: usize,
    last_fill: Option<Instant>,
    value: String,
}

impl StringAssembler {
    pub fn new(buffer_size: usize, age_threshold: Duration) -> anyhow::Result<StringAssembler> {
        if buffer_size == 0 {
            return Err(XPlaneError::invalid_argument("the buffer size of a string dataref must be positive").into());
        }
        if buffer_size > MAX_STRING_BUFFER_SIZE {
            return Err(XPlaneError::invalid_argument(format!("the buffer size of a string dataref must not exceed {}, was {}", MAX_STRING_BUFFER_SIZE, buffer_size)).into());
        }

        Ok(StringAssembler {
            buffer_size,
            age_threshold,
            buffer: vec![0.0; buffer_size],
            num_received: 0,
            last_fill: None,
            value: String::new(),
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn num_received(&self) -> usize {
        self.num_received
    }

    /// Processes one character update. Returns the newly assembled string if this update
    ///  completed a fill cycle *and* the result differs from the previously published value.
    pub fn on_character(&mut self, position: usize, code: f32, now: Instant) -> anyhow::Result<Option<String>> {
        if position >= self.buffer_size {
            return Err(XPlaneError::CharacterPositionOutOfRange { position, buffer_size: self.buffer_size }.into());
        }

        let is_abandoned = match self.last_fill {
            None => true,
            Some(last_fill) => now.saturating_duration_since(last_fill) > self.age_threshold,
        };
        if is_abandoned {
            if self.num_received > 0 {
                debug!(num_received = self.num_received, "discarding partially received string");
            }
            self.reset();
            self.last_fill = Some(now);
        }

        self.buffer[position] = code;
        self.num_received += 1;

        if self.num_received < self.buffer_size {
            return Ok(None);
        }

        let assembled = Self::decode(&self.buffer);
        self.reset();
        self.last_fill = Some(now);

        if assembled == self.value {
            trace!("string fill cycle completed without changes");
            return Ok(None);
        }
        self.value = assembled.clone();
        Ok(Some(assembled))
    }

    /// Starts a new fill cycle. The published value is kept.
    pub fn reset(&mut self) {
        self.num_received = 0;
        self.buffer = vec![0.0; self.buffer_size];
    }

    /// Zero codes are unused buffer slots and contribute no character. So do codes that are
    ///  not a valid character at all - a subscriber never sees a garbled value.
    fn decode(buffer: &[f32]) -> String {
        buffer.iter()
            .filter(|code| code.is_finite() && **code >= 1.0)
            .filter_map(|&code| char::from_u32(code as u32))
            .collect()
    }
}


/// A string dataref as seen by the registry: the assembler behind its own lock, plus the
///  subscribers of the assembled value.
pub struct StringSubscription {
    path: Arc<str>,
    buffer_size: usize,
    assembler: Mutex<StringAssembler>,
    callbacks: Mutex<Vec<(SubscriptionHandle, StringCallback)>>,
}

impl Debug for StringSubscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StringSubscription{{path:{:?},buffer_size:{}}}", self.path, self.buffer_size)
    }
}

impl StringSubscription {
    pub fn new(path: Arc<str>, buffer_size: usize, age_threshold: Duration) -> anyhow::Result<StringSubscription> {
        Ok(StringSubscription {
            path,
            buffer_size,
            assembler: Mutex::new(StringAssembler::new(buffer_size, age_threshold)?),
            callbacks: Default::default(),
        })
    }

    pub fn path(&self) -> &Arc<str> {
        &self.path
    }

    pub fn snapshot(&self) -> StringSnapshot {
        StringSnapshot {
            path: self.path.clone(),
            buffer_size: self.buffer_size,
            value: self.assembler.lock().value().to_string(),
        }
    }

    pub fn add_callback(&self, handle: SubscriptionHandle, callback: StringCallback) {
        self.callbacks.lock().push((handle, callback));
    }

    pub fn has_callback(&self, handle: SubscriptionHandle) -> bool {
        self.callbacks.lock().iter().any(|(h, _)| *h == handle)
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.lock().clear();
    }

    pub fn reset(&self) {
        self.assembler.lock().reset();
    }

    /// Feeds one character into the assembler, notifying subscribers if that produced a new
    ///  value. Callbacks run after both locks were released, so they may (un)subscribe.
    pub fn on_character(&self, position: usize, code: f32) -> anyhow::Result<()> {
        let changed = self.assembler.lock()
            .on_character(position, code, Instant::now())?;

        if let Some(value) = changed {
            debug!(path = ?self.path, ?value, "string dataref changed");
            let snapshot = StringSnapshot {
                path: self.path.clone(),
                buffer_size: self.buffer_size,
                value,
            };
            let callbacks = self.callbacks.lock()
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect::<Vec<_>>();
            for callback in callbacks {
                callback(&snapshot);
            }
        }
        Ok(())
    }
}
