use anyhow::Result;
use clap::Args;

/// Print build and platform information
#[derive(Args, Debug)]
pub struct VersionCommand {}

impl VersionCommand {
    #[allow(clippy::unused_self)]
    pub fn run(&self) -> Result<()> {
        for line in version_lines() {
            println!("{line}");
        }
        Ok(())
    }
}

/// Commit the binary was built from, set by the release build.
fn commit() -> &'static str {
    option_env!("PIVOT_GIT_COMMIT").unwrap_or("unknown")
}

fn version_lines() -> Vec<String> {
    vec![
        format!("Version: {}", env!("CARGO_PKG_VERSION")),
        format!("Commit: {}", commit()),
        format!("OS/Arch: {}/{}", std::env::consts::OS, std::env::consts::ARCH),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_lines() {
        let lines = version_lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("Version: {}", env!("CARGO_PKG_VERSION")));
        assert!(lines[1].starts_with("Commit: "));
        assert!(lines[1].len() > "Commit: ".len());
        assert_eq!(
            lines[2],
            format!("OS/Arch: {}/{}", std::env::consts::OS, std::env::consts::ARCH)
        );
    }
}
