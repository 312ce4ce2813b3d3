//! Generation-checked slot arena.
//!
//! Slots are reused after removal, but every reuse bumps the slot generation.
//! A [`ResourceId`] minted before the removal therefore never resolves to the
//! value that later occupies the same slot.

/// Slot + generation key into an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
	/// Slot index.
	pub slot: u32,
	/// Generation of the slot when this id was minted.
	pub generation: u32,
}

impl std::fmt::Display for ResourceId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "R{}v{}", self.slot, self.generation)
	}
}

#[derive(Debug)]
struct Slot<T> {
	generation: u32,
	value: Option<T>,
}

/// Arena of values keyed by [`ResourceId`].
#[derive(Debug)]
pub struct Arena<T> {
	slots: Vec<Slot<T>>,
	free: Vec<u32>,
	len: usize,
}

impl<T> Default for Arena<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Arena<T> {
	/// Creates an empty arena.
	pub const fn new() -> Self {
		Self {
			slots: Vec::new(),
			free: Vec::new(),
			len: 0,
		}
	}

	/// Number of live values.
	pub fn len(&self) -> usize {
		self.len
	}

	/// Returns true when no value is live.
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Inserts a value built from its future id.
	pub fn insert_with(&mut self, f: impl FnOnce(ResourceId) -> T) -> ResourceId {
		let id = match self.free.pop() {
			Some(slot) => {
				let entry = &mut self.slots[slot as usize];
				entry.generation = entry.generation.wrapping_add(1);
				ResourceId {
					slot,
					generation: entry.generation,
				}
			}
			None => {
				let slot = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
				self.slots.push(Slot { generation: 1, value: None });
				ResourceId { slot, generation: 1 }
			}
		};
		self.slots[id.slot as usize].value = Some(f(id));
		self.len += 1;
		id
	}

	/// Inserts a value.
	pub fn insert(&mut self, value: T) -> ResourceId {
		self.insert_with(|_| value)
	}

	/// Returns the value when `id` is still current.
	pub fn get(&self, id: ResourceId) -> Option<&T> {
		let slot = self.slots.get(id.slot as usize)?;
		if slot.generation != id.generation {
			return None;
		}
		slot.value.as_ref()
	}

	/// Mutable variant of [`Self::get`].
	pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut T> {
		let slot = self.slots.get_mut(id.slot as usize)?;
		if slot.generation != id.generation {
			return None;
		}
		slot.value.as_mut()
	}

	/// Returns true when `id` names a live value.
	pub fn contains(&self, id: ResourceId) -> bool {
		self.get(id).is_some()
	}

	/// Removes and returns the value when `id` is still current.
	pub fn remove(&mut self, id: ResourceId) -> Option<T> {
		let slot = self.slots.get_mut(id.slot as usize)?;
		if slot.generation != id.generation {
			return None;
		}
		let value = slot.value.take()?;
		self.free.push(id.slot);
		self.len -= 1;
		Some(value)
	}

	/// Iterates live values with their ids.
	pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &T)> {
		self.slots.iter().enumerate().filter_map(|(slot, entry)| {
			let value = entry.value.as_ref()?;
			let id = ResourceId {
				slot: slot as u32,
				generation: entry.generation,
			};
			Some((id, value))
		})
	}

	/// Iterates live values mutably with their ids.
	pub fn iter_mut(&mut self) -> impl Iterator<Item = (ResourceId, &mut T)> {
		self.slots.iter_mut().enumerate().filter_map(|(slot, entry)| {
			let generation = entry.generation;
			let value = entry.value.as_mut()?;
			Some((
				ResourceId {
					slot: slot as u32,
					generation,
				},
				value,
			))
		})
	}

	/// Ids of all live values.
	pub fn ids(&self) -> Vec<ResourceId> {
		self.iter().map(|(id, _)| id).collect()
	}
}
