//! Consumers that write events as JSON lines.

use crate::error::ConsumerError;
use crate::events::Event;
use crate::host::Consumer;
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Serialize)]
struct EventLine<'a> {
    consumer: &'a str,
    event: &'static str,
    payload: &'a Event,
}

/// Writes `{"consumer", "event", "payload"}` lines to a writer.
pub struct JsonLinesConsumer {
    name: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesConsumer {
    pub fn new(name: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            out: Mutex::new(out),
        }
    }

    /// One stdout consumer per configured name.
    pub fn stdout_set(names: &[String]) -> Vec<Arc<dyn Consumer>> {
        names
            .iter()
            .map(|name| {
                Arc::new(JsonLinesConsumer::new(name.clone(), Box::new(std::io::stdout())))
                    as Arc<dyn Consumer>
            })
            .collect()
    }
}

impl Consumer for JsonLinesConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn emit(&self, event: &Event) -> Result<(), ConsumerError> {
        let line = serde_json::to_string(&EventLine {
            consumer: &self.name,
            event: event.kind().as_str(),
            payload: event,
        })?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| ConsumerError::Unavailable(self.name.clone()))?;
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}
