//! Volume resolver: detects a multi-volume naming scheme from a
//! first-volume path and composes the path of volume `k` on demand.

use std::path::{Path, PathBuf};

use crate::archive::VolumeNamingScheme;

/// Hard iteration cap bounding worst-case walks of malformed name patterns.
pub const MAX_VOLUMES: u32 = 1000;

#[derive(Debug, Clone)]
pub struct VolumeResolver {
    dir: PathBuf,
    stem: String,
    scheme: VolumeNamingScheme,
}

impl VolumeResolver {
    /// Detects the naming scheme of the archive set that `any_volume`
    /// belongs to; `any_volume` may be the first volume or any continuation
    /// volume, since the stem is recovered either way.
    pub fn detect(any_volume: &Path) -> Option<Self> {
        let filename = any_volume.file_name()?.to_str()?;
        let dir = any_volume
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let lower = filename.to_ascii_lowercase();

        if let Some(idx) = lower.find(".part") {
            let after_marker = idx + 5;
            let rest = &filename[after_marker..];
            let digit_len = rest.chars().take_while(char::is_ascii_digit).count();
            if digit_len > 0 {
                let tail = &rest[digit_len..];
                if tail.eq_ignore_ascii_case(".rar") {
                    return Some(VolumeResolver {
                        dir,
                        stem: filename[..idx].to_string(),
                        scheme: VolumeNamingScheme::NewStyle {
                            digit_width: digit_len as u8,
                        },
                    });
                }
            }
        }

        if lower.ends_with(".rar") {
            return Some(VolumeResolver {
                dir,
                stem: filename[..filename.len() - 4].to_string(),
                scheme: VolumeNamingScheme::OldStyle,
            });
        }

        if let Some(pos) = lower.rfind(".r") {
            let rest = &lower[pos + 2..];
            if rest.len() >= 2 && rest.bytes().all(|b| b.is_ascii_digit()) {
                return Some(VolumeResolver {
                    dir,
                    stem: filename[..pos].to_string(),
                    scheme: VolumeNamingScheme::OldStyle,
                });
            }
        }

        None
    }

    /// A resolver for an archive known not to be part of a volume set.
    pub fn single(path: &Path) -> Self {
        let filename = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        let stem = filename.strip_suffix(".rar").unwrap_or(filename).to_string();
        VolumeResolver {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            stem,
            scheme: VolumeNamingScheme::SingleVolume,
        }
    }

    pub fn scheme(&self) -> VolumeNamingScheme {
        self.scheme
    }

    /// Composes the path of the zero-indexed volume `k` (`k == 0` is the
    /// first volume, i.e. the one named in the header). Returns `None` once
    /// `k` exceeds [`MAX_VOLUMES`].
    pub fn volume_path(&self, k: u32) -> Option<PathBuf> {
        if k >= MAX_VOLUMES {
            return None;
        }
        let path = match self.scheme {
            VolumeNamingScheme::SingleVolume => self.dir.join(format!("{}.rar", self.stem)),
            VolumeNamingScheme::OldStyle => {
                if k == 0 {
                    self.dir.join(format!("{}.rar", self.stem))
                } else {
                    let n = k - 1;
                    let width = digit_width_for(n).max(2);
                    self.dir
                        .join(format!("{}.r{n:0width$}", self.stem, n = n, width = width))
                }
            }
            VolumeNamingScheme::NewStyle { digit_width } => {
                let n = k + 1;
                let width = (digit_width as usize).max(digit_width_for(n));
                self.dir.join(format!(
                    "{}.part{n:0width$}.rar",
                    self.stem,
                    n = n,
                    width = width
                ))
            }
        };
        Some(path)
    }

    /// Walks volumes starting at 0 until one is missing, capped at
    /// [`MAX_VOLUMES`]. Used by the raw read path when it needs to confirm
    /// how far a member's data actually extends.
    pub fn existing_volumes(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for k in 0..MAX_VOLUMES {
            let Some(path) = self.volume_path(k) else {
                break;
            };
            if !path.is_file() {
                break;
            }
            out.push(path);
        }
        out
    }
}

fn digit_width_for(n: u32) -> usize {
    n.to_string().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_new_style_from_first_volume() {
        let r = VolumeResolver::detect(Path::new("/a/movie.part001.rar")).unwrap();
        assert_eq!(
            r.scheme(),
            VolumeNamingScheme::NewStyle { digit_width: 3 }
        );
        assert_eq!(r.volume_path(0).unwrap(), Path::new("/a/movie.part001.rar"));
        assert_eq!(r.volume_path(1).unwrap(), Path::new("/a/movie.part002.rar"));
    }

    #[test]
    fn detects_new_style_from_later_volume() {
        let r = VolumeResolver::detect(Path::new("/a/movie.part010.rar")).unwrap();
        assert_eq!(r.volume_path(0).unwrap(), Path::new("/a/movie.part001.rar"));
    }

    #[test]
    fn detects_old_style_from_bare_rar() {
        let r = VolumeResolver::detect(Path::new("/a/movie.rar")).unwrap();
        assert_eq!(r.scheme(), VolumeNamingScheme::OldStyle);
        assert_eq!(r.volume_path(0).unwrap(), Path::new("/a/movie.rar"));
        assert_eq!(r.volume_path(1).unwrap(), Path::new("/a/movie.r00"));
        assert_eq!(r.volume_path(2).unwrap(), Path::new("/a/movie.r01"));
    }

    #[test]
    fn detects_old_style_from_continuation_volume() {
        let r = VolumeResolver::detect(Path::new("/a/movie.r03")).unwrap();
        assert_eq!(r.volume_path(0).unwrap(), Path::new("/a/movie.rar"));
        assert_eq!(r.volume_path(4).unwrap(), Path::new("/a/movie.r03"));
    }

    #[test]
    fn old_style_widens_past_two_digits() {
        let r = VolumeResolver::detect(Path::new("/a/movie.rar")).unwrap();
        // volume index 101 -> r100 (three digits)
        assert_eq!(r.volume_path(101).unwrap(), Path::new("/a/movie.r100"));
    }

    #[test]
    fn rejects_unrelated_extension() {
        assert!(VolumeResolver::detect(Path::new("/a/movie.zip")).is_none());
    }

    #[test]
    fn volume_path_respects_hard_cap() {
        let r = VolumeResolver::detect(Path::new("/a/movie.rar")).unwrap();
        assert!(r.volume_path(MAX_VOLUMES).is_none());
        assert!(r.volume_path(MAX_VOLUMES - 1).is_some());
    }

    #[test]
    fn existing_volumes_stops_at_first_gap() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("movie.rar");
        std::fs::write(&base, b"x").unwrap();
        std::fs::write(dir.path().join("movie.r00"), b"x").unwrap();
        // movie.r01 intentionally missing
        std::fs::write(dir.path().join("movie.r02"), b"x").unwrap();

        let r = VolumeResolver::detect(&base).unwrap();
        let found = r.existing_volumes();
        assert_eq!(found.len(), 2);
    }
}
