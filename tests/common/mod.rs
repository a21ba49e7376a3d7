//! Test doubles shared by the integration tests: an in-memory inference
//! service and a cloneable output buffer.

#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use classinet_cli::{ClassinetError, Credentials, InferenceService, ModelMetadata, Result};

pub const GOOD_TOKEN: &str = "good-token";

/// Image contents the mock service refuses.
pub const REJECTED_IMAGE: &[u8] = b"reject me";

pub struct MockService {
    calls: AtomicUsize,
    registered: AtomicUsize,
    models: Vec<ModelMetadata>,
    /// Seen instance descriptions, one per connect.
    pub descriptions: Mutex<Vec<String>>,
}

pub fn sample_model(id: &str) -> ModelMetadata {
    ModelMetadata {
        name: format!("model {}", id),
        io_wrapper: "darknet".into(),
        input_width: 416,
        input_height: 416,
        class_ids: [(0, "person".to_string())].into_iter().collect(),
        model_id: id.into(),
        description: "test model".into(),
    }
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(MockService {
            calls: AtomicUsize::new(0),
            registered: AtomicUsize::new(0),
            models: vec![sample_model("m1"), sample_model("m2")],
            descriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn called(&self, credentials: &Credentials) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if credentials.user_token != GOOD_TOKEN {
            return Err(ClassinetError::Service("invalid token".into()));
        }
        Ok(())
    }
}

impl InferenceService for MockService {
    fn connect(&self, credentials: &Credentials) -> Result<()> {
        self.called(credentials)?;
        self.descriptions
            .lock()?
            .push(credentials.instance_description.clone());
        Ok(())
    }

    fn available_models(&self, credentials: &Credentials) -> Result<Vec<ModelMetadata>> {
        self.called(credentials)?;
        Ok(self.models.clone())
    }

    fn model(&self, credentials: &Credentials, model_id: &str) -> Result<Option<ModelMetadata>> {
        self.called(credentials)?;
        Ok(self.models.iter().find(|m| m.model_id == model_id).cloned())
    }

    fn register_model(
        &self,
        credentials: &Credentials,
        metadata: &ModelMetadata,
        binary_model: &[u8],
    ) -> Result<ModelMetadata> {
        self.called(credentials)?;
        if binary_model.is_empty() {
            return Err(ClassinetError::Service("empty model".into()));
        }
        let n = self.registered.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ModelMetadata {
            model_id: format!("registered-{}", n),
            ..metadata.clone()
        })
    }

    fn infer(
        &self,
        credentials: &Credentials,
        model_id: &str,
        image: &[u8],
        _user_context: &str,
    ) -> Result<String> {
        self.called(credentials)?;
        // Shuffle completion order a little.
        thread::sleep(Duration::from_millis((image.len() % 7) as u64 * 3));
        if image == REJECTED_IMAGE {
            return Err(ClassinetError::Service("image rejected".into()));
        }
        Ok(format!(
            "{} detections: {}",
            model_id,
            String::from_utf8_lossy(image)
        ))
    }
}

#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
