//! Reference image tracking.

use rustc_hash::FxHashSet;
use tessera_primitives::FeatureKind;

use crate::binding::{TrackablePayload, TrackerConfig};
use crate::error::ResourceError;
use crate::subsystem::TrackableSubsystem;

/// One image the tracker should look for.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
	/// Unique name reported back with every detection.
	pub name: String,
	/// Printed size in meters. `None` lets the runtime estimate it.
	pub physical_size: Option<[f32; 2]>,
}

impl ReferenceImage {
	pub fn new(name: impl Into<String>, physical_size: Option<[f32; 2]>) -> Self {
		Self {
			name: name.into(),
			physical_size,
		}
	}
}

/// Reference image library handed to the native tracker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageLibrary {
	pub images: Vec<ReferenceImage>,
	/// Images tracked at the same time; 0 leaves it to the runtime.
	pub max_tracked: u32,
}

impl TrackerConfig<ImagePayload> for ImageLibrary {
	fn validate(&self) -> Result<(), ResourceError> {
		let mut names = FxHashSet::default();
		for image in &self.images {
			if image.name.is_empty() {
				return Err(ResourceError::InvalidConfig("reference image without a name".into()));
			}
			if !names.insert(image.name.as_str()) {
				return Err(ResourceError::InvalidConfig(format!("duplicate reference image {:?}", image.name)));
			}
			if let Some([w, h]) = image.physical_size
				&& !(w > 0.0 && h > 0.0)
			{
				return Err(ResourceError::InvalidConfig(format!("reference image {:?} has size {w}x{h}", image.name)));
			}
		}
		Ok(())
	}

	fn accepts(&self, payload: &ImagePayload) -> bool {
		self.images.iter().any(|i| i.name == payload.name)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
	/// Name of the matched reference image.
	pub name: String,
	/// Size in meters as measured or configured.
	pub physical_size: [f32; 2],
}

impl TrackablePayload for ImagePayload {
	const FEATURE: FeatureKind = FeatureKind::ImageTracking;
}

pub type ImageTracking<B> = TrackableSubsystem<B>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validation_rejects_degenerate_libraries() {
		let ok = ImageLibrary {
			images: vec![ReferenceImage::new("poster", Some([0.5, 0.7])), ReferenceImage::new("logo", None)],
			max_tracked: 2,
		};
		assert!(ok.validate().is_ok());

		let zero = ImageLibrary {
			images: vec![ReferenceImage::new("flat", Some([0.0, 1.0]))],
			..ImageLibrary::default()
		};
		assert!(matches!(zero.validate(), Err(ResourceError::InvalidConfig(_))));

		let dup = ImageLibrary {
			images: vec![ReferenceImage::new("a", None), ReferenceImage::new("a", None)],
			..ImageLibrary::default()
		};
		assert!(dup.validate().is_err());

		let unnamed = ImageLibrary {
			images: vec![ReferenceImage::new("", None)],
			..ImageLibrary::default()
		};
		assert!(unnamed.validate().is_err());
	}

	#[test]
	fn only_library_images_are_accepted() {
		let library = ImageLibrary {
			images: vec![ReferenceImage::new("poster", None)],
			..ImageLibrary::default()
		};
		let hit = |name: &str| ImagePayload {
			name: name.into(),
			physical_size: [1.0, 1.0],
		};
		assert!(library.accepts(&hit("poster")));
		assert!(!library.accepts(&hit("stranger")));
	}
}
