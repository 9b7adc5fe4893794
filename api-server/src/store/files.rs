use scout_core::route::parse_route_points;

use super::*;

impl ScoutStore {
    fn route_filename(name: &str) -> Result<String, String> {
        let name = name.trim();

        if name.is_empty() {
            return Err("invalid route name: empty".to_string());
        }
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(format!(
                "invalid route name (must be a plain name, not a path): {name}"
            ));
        }

        Ok(format!("{name}.txt"))
    }

    pub(super) fn route_path(&self, name: &str) -> Result<Option<PathBuf>, String> {
        let Some(dir) = self.routes_dir.as_ref() else {
            return Ok(None);
        };
        Ok(Some(dir.join(Self::route_filename(name)?)))
    }

    /// Reads `{routes_dir}/{name}.txt`. A missing directory, missing file or
    /// unusable name yields `None` so the caller falls back to the spiral.
    pub(super) fn load_route(&self, name: &str) -> Result<Option<Vec<LatLon>>, String> {
        let path = match self.route_path(name) {
            Ok(Some(path)) => path,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(route = %name, "skipping route file: {e}");
                return Ok(None);
            }
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read route file {}: {e}", path.display())),
        };

        match parse_route_points(&text) {
            Ok(points) => Ok(Some(points)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring malformed route file: {e}");
                Ok(None)
            }
        }
    }
}
