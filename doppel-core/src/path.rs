// SPDX-License-Identifier: AGPL-3.0-or-later
//! Abstract path model
//!
//! An [`AbstractPath`] is a pair of a [`DeviceRoot`] (which backend, which
//! mounted root) and an [`AfsPath`] relative to that root. Nothing in here
//! touches the filesystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, MAIN_SEPARATOR};

use crate::error::{DoppelError, DoppelResult};

/// Scheme of the local-disk backend. Native phrases are plain absolute paths.
pub const NATIVE_SCHEME: &str = "native";

const SCHEME_SEPARATOR: &str = "://";

/// A mounted root of one backend kind (local volume, remote endpoint, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceRoot {
    scheme: String,
    root: String,
}

impl DeviceRoot {
    pub fn new(scheme: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            root: root.into(),
        }
    }

    /// Local device root such as `/` or `/media/user/usb`. Anything that
    /// is not itself a device root, relative paths included, is rejected.
    pub fn native(root: impl Into<String>) -> DoppelResult<Self> {
        let root = root.into();
        match split_native_path(&root) {
            Some((split_root, segments)) if segments.is_empty() && split_root == root => {
                Ok(Self::new(NATIVE_SCHEME, root))
            }
            _ => Err(DoppelError::InvalidPath(format!("{root} is not a local device root"))),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_native(&self) -> bool {
        self.scheme == NATIVE_SCHEME
    }
}

impl fmt::Display for DeviceRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "{}", self.root)
        } else {
            write!(f, "{}{}{}", self.scheme, SCHEME_SEPARATOR, self.root)
        }
    }
}

/// Path relative to a device root, `/`-separated, without leading or
/// trailing separator. The empty path denotes the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AfsPath(String);

impl AfsPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self::root().join(path)
    }

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .fold(Self::root(), |path, seg| path.join(seg))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Append one or more `/`-separated components. `.` is ignored and `..`
    /// steps up, never above the root.
    pub fn join(&self, name: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = self.segments().collect();
        for part in name.as_ref().split('/').filter(|s| !s.is_empty()) {
            match part {
                "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(part),
            }
        }
        Self(segments.join("/"))
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rsplit_once('/') {
            Some((parent, _)) => Self(parent.to_string()),
            None => Self::root(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            Some(self.0.rsplit('/').next().unwrap_or(&self.0))
        }
    }

    pub fn extension(&self) -> Option<&str> {
        self.name().and_then(|n| n.rsplit_once('.')).map(|(_, ext)| ext)
    }

    /// Path of `self` below `base`, if `base` is a prefix of `self`.
    pub fn strip_prefix(&self, base: &AfsPath) -> Option<AfsPath> {
        if base.is_root() {
            return Some(self.clone());
        }
        if self.0 == base.0 {
            return Some(Self::root());
        }
        self.0
            .strip_prefix(&base.0)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| Self(rest.to_string()))
    }
}

impl fmt::Display for AfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of an item on some backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbstractPath {
    device: DeviceRoot,
    path: AfsPath,
}

impl AbstractPath {
    /// Native paths are re-split so that the device root always matches what
    /// [`AbstractPath::parse_phrase`] derives for the same location.
    pub fn new(device: DeviceRoot, path: AfsPath) -> Self {
        if device.is_native() {
            let full = native_join(device.root(), &path);
            if let Some((root, segments)) = split_native_path(&full) {
                return Self {
                    device: DeviceRoot::new(NATIVE_SCHEME, root),
                    path: AfsPath::from_segments(segments),
                };
            }
        }
        Self { device, path }
    }

    /// Build from an absolute local path.
    pub fn native(path: impl AsRef<Path>) -> DoppelResult<Self> {
        let path = path.as_ref();
        let text = path
            .to_str()
            .ok_or_else(|| DoppelError::InvalidPath(path.to_string_lossy().into_owned()))?;
        let (root, segments) =
            split_native_path(text).ok_or_else(|| DoppelError::InvalidPath(text.to_string()))?;
        Ok(Self {
            device: DeviceRoot::new(NATIVE_SCHEME, root),
            path: AfsPath::from_segments(segments),
        })
    }

    pub fn device(&self) -> &DeviceRoot {
        &self.device
    }

    pub fn afs_path(&self) -> &AfsPath {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<str>) -> Self {
        Self::new(self.device.clone(), self.path.join(name))
    }

    pub fn parent(&self) -> Option<Self> {
        self.path
            .parent()
            .map(|p| Self::new(self.device.clone(), p))
    }

    pub fn name(&self) -> Option<&str> {
        self.path.name()
    }

    pub fn same_device(&self, other: &AbstractPath) -> bool {
        self.device == other.device
    }

    /// Textual form used to persist folder-pair configuration.
    pub fn to_phrase(&self) -> String {
        if self.device.is_native() {
            return native_join(self.device.root(), &self.path);
        }
        let mut phrase = format!(
            "{}{}{}",
            self.device.scheme,
            SCHEME_SEPARATOR,
            urlencoding::encode(&self.device.root)
        );
        for seg in self.path.segments() {
            phrase.push('/');
            phrase.push_str(&urlencoding::encode(seg));
        }
        phrase
    }

    pub fn parse_phrase(phrase: &str) -> DoppelResult<Self> {
        let invalid = || DoppelError::InvalidPath(phrase.to_string());

        if let Some((scheme, rest)) = split_scheme(phrase) {
            if scheme == NATIVE_SCHEME {
                return Err(invalid());
            }
            let mut parts = rest.split('/');
            let root = decode(parts.next().unwrap_or_default()).ok_or_else(invalid)?;
            let mut segments = Vec::new();
            for part in parts.filter(|p| !p.is_empty()) {
                segments.push(decode(part).ok_or_else(invalid)?);
            }
            return Ok(Self {
                device: DeviceRoot::new(scheme, root),
                path: AfsPath::from_segments(segments),
            });
        }

        let (root, segments) = split_native_path(phrase).ok_or_else(invalid)?;
        Ok(Self {
            device: DeviceRoot::new(NATIVE_SCHEME, root),
            path: AfsPath::from_segments(segments),
        })
    }
}

impl fmt::Display for AbstractPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_phrase())
    }
}

fn decode(s: &str) -> Option<String> {
    urlencoding::decode(s).ok().map(|c| c.into_owned())
}

/// `scheme://rest`, where the scheme is at least two characters so that
/// drive letters are never mistaken for one.
fn split_scheme(phrase: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = phrase.split_once(SCHEME_SEPARATOR)?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = scheme.len() >= 2
        && first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}

fn native_join(root: &str, path: &AfsPath) -> String {
    if path.is_root() {
        return root.to_string();
    }
    let rel: Vec<&str> = path.segments().collect();
    let rel = rel.join(&MAIN_SEPARATOR.to_string());
    if root.ends_with(MAIN_SEPARATOR) {
        format!("{root}{rel}")
    } else {
        format!("{root}{MAIN_SEPARATOR}{rel}")
    }
}

/// Split an absolute local path into (device root, components).
fn split_native_path(path: &str) -> Option<(String, Vec<String>)> {
    let p = Path::new(path);
    if !p.is_absolute() {
        return None;
    }

    let mut root = String::new();
    let mut segments: Vec<String> = Vec::new();
    for component in p.components() {
        match component {
            Component::Prefix(prefix) => root.push_str(&prefix.as_os_str().to_string_lossy()),
            Component::RootDir => root.push(MAIN_SEPARATOR),
            Component::CurDir => {}
            Component::ParentDir => {
                segments.pop();
            }
            Component::Normal(seg) => segments.push(seg.to_string_lossy().into_owned()),
        }
    }

    let mount = mount_prefix_len(&segments);
    if mount > 0 {
        let volume: Vec<String> = segments.drain(..mount).collect();
        root.push_str(&volume.join(&MAIN_SEPARATOR.to_string()));
    }
    Some((root, segments))
}

/// Removable and network volumes get their own device root so that moves
/// between them are recognised as cross-volume without asking the OS.
fn mount_prefix_len(segments: &[String]) -> usize {
    if !cfg!(unix) {
        return 0;
    }
    let s: Vec<&str> = segments.iter().map(String::as_str).collect();
    match s.as_slice() {
        ["run", "media", _, _, ..] => 4,
        ["media", _, _, ..] => 3,
        ["mnt", _, ..] | ["Volumes", _, ..] => 2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_afs_path_normalizes() {
        let path = AfsPath::new("//home//user/./docs/");
        assert_eq!(path.as_str(), "home/user/docs");
        assert_eq!(path.segments().collect::<Vec<_>>(), vec!["home", "user", "docs"]);
    }

    #[test]
    fn test_afs_path_join_with_dotdot() {
        let path = AfsPath::new("home/user/docs");
        assert_eq!(path.join("../pictures").as_str(), "home/user/pictures");
        assert!(AfsPath::root().join("..").is_root());
    }

    #[test]
    fn test_afs_path_parent_and_name() {
        let path = AfsPath::new("a/b/file.tar.gz");
        assert_eq!(path.name(), Some("file.tar.gz"));
        assert_eq!(path.extension(), Some("gz"));
        assert_eq!(path.parent().unwrap().as_str(), "a/b");
        assert_eq!(AfsPath::new("a").parent(), Some(AfsPath::root()));
        assert!(AfsPath::root().parent().is_none());
        assert!(AfsPath::root().name().is_none());
    }

    #[test]
    fn test_strip_prefix() {
        let path = AfsPath::new("a/b/c");
        assert_eq!(path.strip_prefix(&AfsPath::new("a")), Some(AfsPath::new("b/c")));
        assert_eq!(path.strip_prefix(&AfsPath::new("a/b/c")), Some(AfsPath::root()));
        assert_eq!(path.strip_prefix(&AfsPath::new("a/bb")), None);
        assert_eq!(AfsPath::new("ab/c").strip_prefix(&AfsPath::new("a")), None);
    }

    #[test]
    fn test_remote_phrase_round_trip() {
        let path = AbstractPath::new(
            DeviceRoot::new("sftp", "user@host:22"),
            AfsPath::new("docs/my file%.txt"),
        );
        let phrase = path.to_phrase();
        assert_eq!(phrase, "sftp://user%40host%3A22/docs/my%20file%25.txt");
        assert_eq!(AbstractPath::parse_phrase(&phrase).unwrap(), path);
    }

    #[test]
    fn test_remote_phrase_empty_root() {
        let path = AbstractPath::new(DeviceRoot::new("mem", ""), AfsPath::new("a"));
        assert_eq!(path.to_phrase(), "mem:///a");
        assert_eq!(AbstractPath::parse_phrase("mem:///a").unwrap(), path);
    }

    #[test]
    fn test_native_phrase_is_plain_path() {
        let path = AbstractPath::parse_phrase("/home/user/docs").unwrap();
        assert!(path.device().is_native());
        assert_eq!(path.device().root(), "/");
        assert_eq!(path.afs_path().as_str(), "home/user/docs");
        assert_eq!(path.to_phrase(), "/home/user/docs");
    }

    #[test]
    fn test_native_mount_roots() {
        let usb = AbstractPath::parse_phrase("/media/user/usb/backup").unwrap();
        assert_eq!(usb.device().root(), "/media/user/usb");
        assert_eq!(usb.afs_path().as_str(), "backup");

        let mnt = AbstractPath::parse_phrase("/mnt/nas").unwrap();
        assert_eq!(mnt.device().root(), "/mnt/nas");
        assert!(mnt.afs_path().is_root());
        assert_eq!(mnt.to_phrase(), "/mnt/nas");

        let home = AbstractPath::parse_phrase("/home/user").unwrap();
        assert!(!home.same_device(&usb));
    }

    #[test]
    fn test_native_join_resplits_root() {
        let root = AbstractPath::parse_phrase("/").unwrap();
        let joined = root.join("media").join("user").join("usb").join("x");
        assert_eq!(joined.device().root(), "/media/user/usb");
        assert_eq!(
            AbstractPath::parse_phrase(&joined.to_phrase()).unwrap(),
            joined
        );
    }

    #[test]
    fn test_parse_phrase_invalid() {
        assert!(AbstractPath::parse_phrase("relative/path").is_err());
        assert!(AbstractPath::parse_phrase("native:///x").is_err());
        assert!(AbstractPath::parse_phrase("mem://%ZZ/a").is_err());
    }

    #[test]
    fn test_native_device_root_must_be_absolute_root() {
        assert!(DeviceRoot::native("relative").is_err());
        assert!(DeviceRoot::native("").is_err());
        assert!(DeviceRoot::native("/home/user").is_err());

        let usb = DeviceRoot::native("/media/user/usb").unwrap();
        let path = AbstractPath::new(usb, AfsPath::new("backup"));
        assert_eq!(AbstractPath::parse_phrase(&path.to_phrase()).unwrap(), path);
        assert_eq!(DeviceRoot::native("/").unwrap().to_string(), "/");
    }

    #[test]
    fn test_round_trip_many() {
        let samples = [
            "/",
            "/a",
            "/a/b c/d",
            "/run/media/u/disk/x/y",
            "/media/u",
            "s3://bucket/key/with space",
            "webdav://host:8080/dav/%C3%A4",
            "mem://vol",
        ];
        for phrase in samples {
            let path = AbstractPath::parse_phrase(phrase).unwrap();
            assert_eq!(
                AbstractPath::parse_phrase(&path.to_phrase()).unwrap(),
                path,
                "{phrase}"
            );
        }
    }
}
