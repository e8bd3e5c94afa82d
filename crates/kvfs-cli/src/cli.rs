use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvfs_engine::{EngineConfig, FileType, Filesystem, Stat};
use std::io::{Read, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kvfs")]
#[command(about = "Inspect and modify a kvfs data directory", long_about = None)]
pub struct Cli {
    /// Engine config file (.toml or .json).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Data directory; overrides the config file.
    #[arg(short, long, env = "KVFS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List a directory.
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },
    /// Show attributes of a node without following symlinks.
    Stat { path: String },
    /// Print a file to stdout.
    Cat { path: String },
    /// Write stdin, or a local file, into a file.
    Put {
        path: String,
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Create a directory.
    Mkdir {
        path: String,
        #[arg(short, long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    /// Create a directory and any missing parents.
    MkdirAll {
        path: String,
        #[arg(short, long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    /// Remove a file, symlink or empty directory.
    Rm { path: String },
    /// Remove a node and everything below it.
    RmAll { path: String },
    /// Rename a node, moving its subtree along.
    Mv { from: String, to: String },
    /// Create a symlink at `link` pointing to `target`.
    Ln { target: String, link: String },
    /// Print the target of a symlink.
    Readlink { path: String },
    /// Change permission bits.
    Chmod {
        #[arg(value_parser = parse_mode)]
        mode: u32,
        path: String,
    },
    /// Resize a file, zero-filling when it grows.
    Truncate { path: String, size: u64 },
    /// Compact the write-ahead log.
    Checkpoint,
}

fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8)
        .map_err(|e| format!("invalid octal mode {:?}: {}", s, e))
}

fn type_char(file_type: FileType) -> char {
    match file_type {
        FileType::Directory => 'd',
        FileType::Symlink => 'l',
        FileType::File => '-',
    }
}

fn format_stat(st: &Stat) -> String {
    format!(
        "{}{:04o} {:>10} {:>12} {}{}",
        type_char(st.file_type),
        st.mode & 0o7777,
        st.size,
        st.mtime,
        st.name,
        if st.data_external { " [ext]" } else { "" }
    )
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if config.data_dir.is_none() {
            tracing::warn!("No data directory configured, changes will not be persisted");
        }
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.engine_config()?;
        let fs = Filesystem::mount(&config).await?;

        match self.command {
            Command::Ls { path } => {
                for st in fs.readdir(&path).await? {
                    println!("{}", format_stat(&st));
                }
            }
            Command::Stat { path } => {
                let st = fs.stat(&path).await?;
                println!("{}", format_stat(&st));
                println!("atime: {}", st.atime);
            }
            Command::Cat { path } => {
                let data = fs.read_file(&path).await?;
                std::io::stdout().write_all(&data)?;
            }
            Command::Put { path, input } => {
                let data = match input {
                    Some(local) => std::fs::read(&local)
                        .with_context(|| format!("reading {}", local.display()))?,
                    None => {
                        let mut buf = Vec::new();
                        std::io::stdin().read_to_end(&mut buf)?;
                        buf
                    }
                };
                fs.write_file(&path, &data).await?;
                tracing::info!("Wrote {} bytes to {}", data.len(), path);
            }
            Command::Mkdir { path, mode } => fs.mkdir(&path, mode).await?,
            Command::MkdirAll { path, mode } => fs.mkdir_all(&path, mode).await?,
            Command::Rm { path } => fs.remove(&path).await?,
            Command::RmAll { path } => fs.remove_all(&path).await?,
            Command::Mv { from, to } => fs.rename(&from, &to).await?,
            Command::Ln { target, link } => fs.symlink(&target, &link).await?,
            Command::Readlink { path } => println!("{}", fs.readlink(&path).await?),
            Command::Chmod { mode, path } => fs.chmod(&path, mode).await?,
            Command::Truncate { path, size } => fs.truncate(&path, size).await?,
            Command::Checkpoint => fs.checkpoint().await?,
        }
        Ok(())
    }
}
