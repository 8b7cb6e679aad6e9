//! File choosers opened by `<input type=file>` elements.

use std::sync::{Arc, Weak};

use pilot_runtime::{Error, Result};

use crate::element_handle::ElementHandle;
use crate::file_payload::InputFiles;
use crate::page::Page;

/// A pending file chooser.
///
/// One remote notification produces exactly one chooser; every listener and
/// waiter of that notification receives a clone of the same value, so
/// `==` holds between them.
#[derive(Clone)]
pub struct FileChooser {
	inner: Arc<ChooserInner>,
}

struct ChooserInner {
	page: Weak<Page>,
	element: Arc<ElementHandle>,
	is_multiple: bool,
}

impl FileChooser {
	pub(crate) fn new(page: Weak<Page>, element: Arc<ElementHandle>, is_multiple: bool) -> Self {
		Self {
			inner: Arc::new(ChooserInner {
				page,
				element,
				is_multiple,
			}),
		}
	}

	/// The page this chooser belongs to, while it is alive.
	pub fn page(&self) -> Option<Arc<Page>> {
		self.inner.page.upgrade()
	}

	/// The input element that opened the chooser.
	pub fn element(&self) -> Arc<ElementHandle> {
		Arc::clone(&self.inner.element)
	}

	/// Whether the input accepts more than one file.
	pub fn is_multiple(&self) -> bool {
		self.inner.is_multiple
	}

	/// Accepts the chooser with `files`.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] when more than one file is given to a
	/// single-file input.
	pub async fn set_files(&self, files: impl Into<InputFiles>, timeout: Option<f64>) -> Result<()> {
		let files = files.into();
		if !self.is_multiple() && files.len() > 1 {
			return Err(Error::InvalidArgument(
				"Non-multiple file input can only accept single file".to_string(),
			));
		}
		let timeout = match timeout {
			Some(t) => Some(t),
			None => self.page().map(|page| page.default_action_timeout()),
		};
		self.inner.element.set_input_files(files, timeout).await
	}
}

impl PartialEq for FileChooser {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for FileChooser {}

impl std::fmt::Debug for FileChooser {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		use pilot_runtime::ChannelOwner;
		f.debug_struct("FileChooser")
			.field("element", &self.inner.element.guid())
			.field("is_multiple", &self.inner.is_multiple)
			.finish()
	}
}
