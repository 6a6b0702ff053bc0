//! Magnet locators for metainfo-less downloads.

use crate::types::InfoHash;

/// Build the locator handed to the engine for a discovered swarm.
///
/// The display name is percent-encoded so `&` or `#` in a torrent name
/// cannot truncate the link.
pub fn magnet_link(info_hash: &InfoHash, name: &str) -> String {
    format!(
        "magnet:?xt=urn:btih:{}&dn={}",
        info_hash.to_hex(),
        urlencoding::encode(name)
    )
}
