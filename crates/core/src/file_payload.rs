//! Files for `<input type=file>` elements.

use std::path::{Path, PathBuf};

use pilot_protocol::SerializedFilePayload;
use pilot_runtime::{Error, Result};

/// An in-memory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
	pub name: String,
	pub mime_type: String,
	pub buffer: Vec<u8>,
}

impl FilePayload {
	pub fn builder() -> FilePayloadBuilder {
		FilePayloadBuilder::default()
	}

	fn to_wire(&self) -> SerializedFilePayload {
		SerializedFilePayload::new(&self.name, &self.mime_type, &self.buffer)
	}
}

#[derive(Debug, Default)]
pub struct FilePayloadBuilder {
	name: Option<String>,
	mime_type: Option<String>,
	buffer: Vec<u8>,
}

impl FilePayloadBuilder {
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Overrides the MIME type guessed from the name.
	pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
		self.mime_type = Some(mime_type.into());
		self
	}

	pub fn buffer(mut self, buffer: impl Into<Vec<u8>>) -> Self {
		self.buffer = buffer.into();
		self
	}

	pub fn build(self) -> FilePayload {
		let name = self.name.unwrap_or_default();
		let mime_type = self
			.mime_type
			.unwrap_or_else(|| mime_type_for(Path::new(&name)));
		FilePayload {
			name,
			mime_type,
			buffer: self.buffer,
		}
	}
}

/// Files to set on an input: paths read at call time, or in-memory payloads.
///
/// An empty list clears the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFiles {
	Paths(Vec<PathBuf>),
	Payloads(Vec<FilePayload>),
}

impl InputFiles {
	pub fn none() -> Self {
		Self::Paths(Vec::new())
	}

	pub fn len(&self) -> usize {
		match self {
			Self::Paths(paths) => paths.len(),
			Self::Payloads(payloads) => payloads.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Reads and encodes the files. Relative paths resolve against the
	/// current directory.
	pub(crate) async fn to_wire(&self) -> Result<Vec<SerializedFilePayload>> {
		match self {
			Self::Payloads(payloads) => Ok(payloads.iter().map(FilePayload::to_wire).collect()),
			Self::Paths(paths) => {
				let cwd = std::env::current_dir()?;
				let mut wire = Vec::with_capacity(paths.len());
				for path in paths {
					let path = cwd.join(path);
					let name = path
						.file_name()
						.and_then(|n| n.to_str())
						.ok_or_else(|| Error::InvalidArgument(format!("Invalid file path: {}", path.display())))?;
					let buffer = tokio::fs::read(&path).await.map_err(|e| {
						Error::InvalidArgument(format!("Failed to read {}: {e}", path.display()))
					})?;
					wire.push(SerializedFilePayload::new(name, mime_type_for(&path), &buffer));
				}
				Ok(wire)
			}
		}
	}
}

impl From<&str> for InputFiles {
	fn from(path: &str) -> Self {
		Self::Paths(vec![PathBuf::from(path)])
	}
}

impl From<&Path> for InputFiles {
	fn from(path: &Path) -> Self {
		Self::Paths(vec![path.to_path_buf()])
	}
}

impl From<PathBuf> for InputFiles {
	fn from(path: PathBuf) -> Self {
		Self::Paths(vec![path])
	}
}

impl From<Vec<PathBuf>> for InputFiles {
	fn from(paths: Vec<PathBuf>) -> Self {
		Self::Paths(paths)
	}
}

impl From<&[&str]> for InputFiles {
	fn from(paths: &[&str]) -> Self {
		Self::Paths(paths.iter().map(PathBuf::from).collect())
	}
}

impl From<FilePayload> for InputFiles {
	fn from(payload: FilePayload) -> Self {
		Self::Payloads(vec![payload])
	}
}

impl From<Vec<FilePayload>> for InputFiles {
	fn from(payloads: Vec<FilePayload>) -> Self {
		Self::Payloads(payloads)
	}
}

/// MIME type from the file extension, `application/octet-stream` when unknown.
pub fn mime_type_for(path: &Path) -> String {
	mime_guess::from_path(path).first_or_octet_stream().to_string()
}
