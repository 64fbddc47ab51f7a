use crate::client::ClientResult;
use std::sync::Arc;

/// Remote object behind a local source path.
pub trait RemoteObject: Send + Sync {
    fn name(&self) -> &str;

    /// Whether object structure (includes, content locators) is already loaded.
    fn has_structure(&self) -> bool;

    fn load_structure(&self) -> ClientResult<()>;

    /// Content locator of the object source, available once structure is loaded.
    fn contents_uri(&self) -> Option<String>;
}

/// Maps local source paths to remote objects and back.
pub trait ObjectResolver: Send + Sync {
    /// Find remote object for a local source path, [`None`] if the path is not a remote source.
    fn resolve(&self, connection_id: &str, path: &str) -> ClientResult<Option<Arc<dyn RemoteObject>>>;

    /// Local path of the source addressed by a remote locator.
    fn local_path(&self, connection_id: &str, uri: &str) -> ClientResult<String>;
}
