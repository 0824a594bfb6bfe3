use std::{
	collections::BTreeMap,
	io::ErrorKind,
	path::{Component, Path, PathBuf},
	sync::atomic::{AtomicUsize, Ordering},
};

use tokio::sync::RwLock;

use crate::{BoxFuture, Error, Result};

/// Blob storage for assembled uploads. Keys are `/`-separated relative paths.
pub trait ObjectStore
where
	Self: Send + Sync,
{
	fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>>;

	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;

	fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

	/// Keys under `prefix`, sorted.
	fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;
}

pub struct FsObjectStore {
	root: PathBuf,
}
impl FsObjectStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn resolve(&self, key: &str) -> Result<PathBuf> {
		let relative = Path::new(key);
		let safe = !key.is_empty()
			&& relative.components().all(|component| matches!(component, Component::Normal(_)));

		if !safe {
			return Err(Error::InvalidArgument(format!("Invalid object key {key:?}.")));
		}

		Ok(self.root.join(relative))
	}

	async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
		let path = self.resolve(key)?;

		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		// Write to a sibling file first so readers never observe a partial object.
		let staging = path.with_extension("partial");

		tokio::fs::write(&staging, bytes).await?;
		tokio::fs::rename(&staging, &path).await?;

		Ok(())
	}

	async fn read(&self, key: &str) -> Result<Vec<u8>> {
		let path = self.resolve(key)?;

		match tokio::fs::read(&path).await {
			Ok(bytes) => Ok(bytes),
			Err(err) if err.kind() == ErrorKind::NotFound =>
				Err(Error::NotFound(format!("Object {key} does not exist."))),
			Err(err) => Err(err.into()),
		}
	}

	async fn remove(&self, key: &str) -> Result<()> {
		let path = self.resolve(key)?;

		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err.into()),
		}
	}

	async fn walk(&self, prefix: &str) -> Result<Vec<String>> {
		let mut keys = Vec::new();
		let mut pending = vec![self.root.clone()];

		while let Some(dir) = pending.pop() {
			let mut entries = match tokio::fs::read_dir(&dir).await {
				Ok(entries) => entries,
				Err(err) if err.kind() == ErrorKind::NotFound => continue,
				Err(err) => return Err(err.into()),
			};

			while let Some(entry) = entries.next_entry().await? {
				let path = entry.path();

				if entry.file_type().await?.is_dir() {
					pending.push(path);

					continue;
				}

				let Ok(relative) = path.strip_prefix(&self.root) else {
					continue;
				};
				let key = relative
					.components()
					.map(|component| component.as_os_str().to_string_lossy())
					.collect::<Vec<_>>()
					.join("/");

				if key.starts_with(prefix) && !key.ends_with(".partial") {
					keys.push(key);
				}
			}
		}

		keys.sort();

		Ok(keys)
	}
}

impl ObjectStore for FsObjectStore {
	fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.write(key, bytes))
	}

	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
		Box::pin(self.read(key))
	}

	fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.remove(key))
	}

	fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(self.walk(prefix))
	}
}

/// In-memory [`ObjectStore`] that can be told to fail the next few writes.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
	objects: RwLock<BTreeMap<String, Vec<u8>>>,
	failing_puts: AtomicUsize,
	puts: AtomicUsize,
}
impl MemoryObjectStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_next_puts(&self, count: usize) {
		self.failing_puts.store(count, Ordering::SeqCst);
	}

	/// Successful writes so far.
	pub fn put_count(&self) -> usize {
		self.puts.load(Ordering::SeqCst)
	}
}

impl ObjectStore for MemoryObjectStore {
	fn put<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let should_fail = self
				.failing_puts
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
				.is_ok();

			if should_fail {
				return Err(Error::Io(std::io::Error::other("Injected object store failure.")));
			}

			self.objects.write().await.insert(key.to_string(), bytes.to_vec());
			self.puts.fetch_add(1, Ordering::SeqCst);

			Ok(())
		})
	}

	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
		Box::pin(async move {
			self.objects
				.read()
				.await
				.get(key)
				.cloned()
				.ok_or_else(|| Error::NotFound(format!("Object {key} does not exist.")))
		})
	}

	fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.objects.write().await.remove(key);

			Ok(())
		})
	}

	fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			Ok(self
				.objects
				.read()
				.await
				.keys()
				.filter(|key| key.starts_with(prefix))
				.cloned()
				.collect())
		})
	}
}
