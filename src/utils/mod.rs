use std::path::{Path, PathBuf};
use which::which;

use crate::config::ToolPaths;
use crate::errors::{HarnessError, Result};

/// Finds a client tool executable, preferring `bin_dir` when configured.
pub fn find_tool_executable(tools: &ToolPaths, name: &str) -> Result<PathBuf> {
    if let Some(bin_dir) = &tools.bin_dir {
        let candidate = bin_dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    which(name).map_err(|source| HarnessError::ToolNotFound {
        tool: name.to_string(),
        source,
    })
}

/// Renders `path` with forward slashes regardless of platform.
pub fn make_path_unix(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_path_unix() {
        assert_eq!(
            make_path_unix(Path::new(r"tests\js\server\dump\dump-setup.js")),
            PathBuf::from("tests/js/server/dump/dump-setup.js")
        );
        assert_eq!(
            make_path_unix(Path::new("/already/unix")),
            PathBuf::from("/already/unix")
        );
    }

    #[test]
    fn test_find_tool_prefers_bin_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let tool = dir.path().join("arangodump");
        std::fs::write(&tool, "#!/bin/sh\n")?;

        let tools = ToolPaths {
            bin_dir: Some(dir.path().to_path_buf()),
            ..ToolPaths::default()
        };
        assert_eq!(find_tool_executable(&tools, "arangodump")?, tool);
        Ok(())
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let result = find_tool_executable(&ToolPaths::default(), "no-such-tool-for-dumpharness");
        assert!(matches!(result, Err(HarnessError::ToolNotFound { .. })));
    }
}
