use std::env;
use std::fs::File;
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use anyhow::{Result, Context, anyhow};
use tracing::info;

use crate::decode::DecoderConfig;

pub const DECODER_ENV_VAR: &str = "FRAMEPIPE_DECODER";
const DOTENV_KEY: &str = "DECODER_PATH";
const DEFAULT_DECODER: &str = "ffmpeg";

/// Resolves which decoder binary to run.
/// Explicit flag, then `FRAMEPIPE_DECODER`, then `.env`, then a search of `PATH`.
pub fn resolve_decoder(explicit: Option<PathBuf>) -> Result<DecoderConfig> {
    if let Some(program) = explicit {
        return Ok(DecoderConfig { program });
    }

    if let Some(program) = env::var_os(DECODER_ENV_VAR).filter(|v| !v.is_empty()) {
        info!("Using decoder from {}", DECODER_ENV_VAR);
        return Ok(DecoderConfig { program: program.into() });
    }

    let env_path = Path::new(".env");
    if env_path.exists() {
        if let Ok(program) = load_from_env(env_path) {
            info!("Loaded decoder path from .env");
            return Ok(DecoderConfig { program });
        }
    }

    info!("Decoder not configured. Searching PATH for {}...", DEFAULT_DECODER);
    let search_path = env::var_os("PATH").unwrap_or_default();
    let program = find_in_dirs(DEFAULT_DECODER, env::split_paths(&search_path))?;
    info!("Found decoder: {:?}", program);

    save_to_env(env_path, &program)?;
    info!("Saved decoder path to .env");

    Ok(DecoderConfig { program })
}

fn find_in_dirs<I>(filename: &str, dirs: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    // PATH entries are flat; only their direct children matter.
    for dir in dirs {
        let found = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name() == filename && !e.file_type().is_dir());

        if let Some(entry) = found {
            return Ok(entry.path().to_path_buf());
        }
    }

    Err(anyhow!("Could not find '{}' on PATH. Install it or pass --decoder.", filename))
}

fn load_from_env(path: &Path) -> Result<PathBuf> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == DOTENV_KEY && !value.trim().is_empty() {
                return Ok(PathBuf::from(value.trim()));
            }
        }
    }

    Err(anyhow!("No {} entry in .env", DOTENV_KEY))
}

fn save_to_env(path: &Path, program: &Path) -> Result<()> {
    let mut file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open .env file")?;
    writeln!(file, "{}={}", DOTENV_KEY, program.display())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_save_and_load_env() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".env");
        fs::write(&path, "OTHER_KEY=1\n")?;
        let program = PathBuf::from("/opt/ffmpeg/bin/ffmpeg");

        save_to_env(&path, &program)?;

        let content = fs::read_to_string(&path)?;
        assert!(content.contains("OTHER_KEY=1"));
        assert!(content.contains("DECODER_PATH=/opt/ffmpeg/bin/ffmpeg"));

        assert_eq!(load_from_env(&path)?, program);
        Ok(())
    }

    #[test]
    fn test_load_without_key_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".env");
        fs::write(&path, "DECODER_PATH=\n")?;
        assert!(load_from_env(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_find_in_dirs_uses_first_match() -> Result<()> {
        let first = tempfile::tempdir()?;
        let second = tempfile::tempdir()?;
        fs::create_dir(first.path().join("ffmpeg"))?;
        fs::write(second.path().join("ffmpeg"), "")?;

        let found = find_in_dirs("ffmpeg", [first.path().to_path_buf(), second.path().to_path_buf()])?;
        assert_eq!(found, second.path().join("ffmpeg"));

        assert!(find_in_dirs("ffmpeg", [first.path().to_path_buf()]).is_err());
        Ok(())
    }

    #[test]
    fn test_explicit_decoder_wins() -> Result<()> {
        let config = resolve_decoder(Some(PathBuf::from("/usr/local/bin/ffmpeg")))?;
        assert_eq!(config.program, PathBuf::from("/usr/local/bin/ffmpeg"));
        Ok(())
    }
}
