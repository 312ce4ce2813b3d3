use crate::TaskClass;

/// Spawns a dedicated named OS thread with shared worker classification metadata.
pub fn spawn_named_thread<F, R>(class: TaskClass, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(worker_class = class.as_str(), thread = %name, "worker.spawn_named_thread");
	std::thread::Builder::new().name(name).spawn(f)
}

/// Extracts the message from a panic payload, if it carries one.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_static_str_payload() {
		let err = std::panic::catch_unwind(|| panic!("boom-str")).unwrap_err();
		assert_eq!(panic_message(err.as_ref()), "boom-str");
	}

	#[test]
	fn extracts_string_payload() {
		let err = std::panic::catch_unwind(|| panic!("{}", String::from("boom-string"))).unwrap_err();
		assert_eq!(panic_message(err.as_ref()), "boom-string");
	}

	#[test]
	fn named_thread_runs_closure() {
		let handle = spawn_named_thread(TaskClass::IoBlocking, "tessera-test", || {
			std::thread::current().name().map(str::to_owned)
		})
		.unwrap();
		assert_eq!(handle.join().unwrap().as_deref(), Some("tessera-test"));
	}
}
