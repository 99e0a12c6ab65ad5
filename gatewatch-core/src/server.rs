//! Blocking client for the attendance server's HTTP API.

use crate::config::ServerConfig;
use crate::report::{LogEvent, LogTransport, ReportError};
use base64::Engine;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {0}")]
    Status(reqwest::StatusCode),
}

/// Filename and MIME type the server expects for intruder snapshots.
pub const INTRUDER_FILENAME: &str = "intruder.jpg";
pub const JPEG_MIME: &str = "image/jpeg";

/// One registered student as returned by `GET /api/students`.
#[derive(Debug, Clone, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    #[serde(rename = "imageData")]
    pub image_data: String,
}

impl StudentRecord {
    /// Decode the base64 photo, accepting an optional `data:<mime>;base64,` prefix.
    pub fn image_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let data = match self.image_data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => self.image_data.as_str(),
        };
        base64::engine::general_purpose::STANDARD.decode(data.trim())
    }
}

pub struct ServerClient {
    client: Client,
    base_url: String,
}

impl ServerClient {
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: Response) -> Result<Response, ServerError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ServerError::Status(status))
        }
    }

    /// `GET /api/students`
    pub fn fetch_students(&self) -> Result<Vec<StudentRecord>, ServerError> {
        let response = self.client.get(self.endpoint("/api/students")).send()?;
        Ok(Self::check(response)?.json()?)
    }

    /// `POST /api/log` with `name`, `timestamp` and, for intruders, an `image` file.
    pub fn post_log(&self, event: &LogEvent) -> Result<(), ServerError> {
        let mut form = Form::new()
            .text("name", event.label.clone())
            .text("timestamp", event.formatted_timestamp());

        if let Some(jpeg) = &event.image {
            let part = Part::bytes(jpeg.clone())
                .file_name(INTRUDER_FILENAME)
                .mime_str(JPEG_MIME)?;
            form = form.part("image", part);
        }

        let response = self
            .client
            .post(self.endpoint("/api/log"))
            .multipart(form)
            .send()?;
        Self::check(response)?;
        Ok(())
    }

    /// `POST /api/register` with `studentName` and a `photo` file.
    pub fn register_student(
        &self,
        name: &str,
        photo: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<serde_json::Value, ServerError> {
        let part = Part::bytes(photo)
            .file_name(file_name.to_string())
            .mime_str(mime)?;
        let form = Form::new()
            .text("studentName", name.to_string())
            .part("photo", part);

        let response = self
            .client
            .post(self.endpoint("/api/register"))
            .multipart(form)
            .send()?;
        Ok(Self::check(response)?.json()?)
    }

    /// `GET /api/status`
    pub fn status(&self) -> Result<serde_json::Value, ServerError> {
        let response = self.client.get(self.endpoint("/api/status")).send()?;
        Ok(Self::check(response)?.json()?)
    }
}

impl LogTransport for ServerClient {
    fn deliver(&mut self, event: &LogEvent) -> Result<(), ReportError> {
        self.post_log(event).map_err(ReportError::from)
    }
}
