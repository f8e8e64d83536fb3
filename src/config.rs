use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once in `main`
/// and handed by reference to every adapter.
#[derive(Clone)]
pub struct AppConfig {
    pub epg_host: String,
    pub epg_protocol: String,
    pub epg_user: String,
    pub epg_password: String,
    pub aws_region: String,
    pub s3_endpoint_url: String,
    pub s3_bucket: String,
    pub s3_prefix: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub cdn_endpoint_url: String,
    pub key_prefix: String,
    pub directory: PathBuf,
    pub database_path: PathBuf,
    pub http_timeout_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("epg_base_url", &self.epg_base_url())
            .field("epg_user", &self.epg_user)
            .field("aws_region", &self.aws_region)
            .field("s3_endpoint_url", &self.s3_endpoint_url)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_prefix", &self.s3_prefix)
            .field("cdn_endpoint_url", &self.cdn_endpoint_url)
            .field("key_prefix", &self.key_prefix)
            .field("directory", &self.directory)
            .field("database_path", &self.database_path)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Archive EPGStation recordings to S3-compatible storage"
)]
pub struct Args {
    /// Host for EPGStation, e.g. example.com:8888 (overrides EPG_HOST)
    #[arg(short = 'H', long, global = true)]
    pub epg_host: Option<String>,

    /// Username for EPGStation (overrides EPG_USER)
    #[arg(short = 'u', long, global = true)]
    pub epg_user: Option<String>,

    /// Protocol for EPGStation, http or https (overrides EPG_PROTOCOL)
    #[arg(long = "epg-proto", global = true)]
    pub epg_protocol: Option<String>,

    /// Password for EPGStation (overrides EPG_PASSWORD)
    #[arg(short = 'p', long = "epg-pass", global = true)]
    pub epg_password: Option<String>,

    /// Directory to download files into (overrides DIRECTORY)
    #[arg(short = 'd', long, global = true)]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List tracked recordings
    #[command(visible_alias = "list")]
    Ls {
        /// Only entries whose epg or s3 status equals this value ("all" for every entry)
        #[arg(short, long, default_value = "all")]
        status: String,

        /// Extra fields to show (repeatable); "size" is shown in GB
        #[arg(short, long = "field", default_values_t = [String::from("name")])]
        fields: Vec<String>,

        /// Hide the epg/s3/local status columns
        #[arg(long)]
        hide_status: bool,
    },

    /// Print stored records as JSON
    Info {
        /// Recording ids or store keys
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Register new recordings without downloading them
    Pending,

    /// Download and verify the given recordings
    #[command(visible_alias = "dl")]
    Download {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Download every recording that is not yet downloaded
    DownloadAll {
        /// Also retry entries whose last download failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Upload the given recordings
    Upload {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Re-upload entries that are already uploaded
        #[arg(short, long)]
        force: bool,

        /// Just show files to upload
        #[arg(short, long)]
        test: bool,
    },

    /// Upload every downloaded recording that is not yet uploaded
    UploadAll {
        /// Re-upload entries that are already uploaded
        #[arg(short, long)]
        force: bool,

        /// Just show files to upload
        #[arg(short, long)]
        test: bool,
    },

    /// Delete local copies and, optionally, the remote source or stored objects
    #[command(visible_aliases = ["del", "rm"])]
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Delete without asking, regardless of status
        #[arg(short, long)]
        force: bool,

        /// Also delete the recording on EPGStation
        #[arg(short, long)]
        epg: bool,

        /// Also delete the uploaded object
        #[arg(short, long)]
        s3: bool,
    },

    /// Show free space on EPGStation
    #[command(visible_alias = "show-free")]
    Free,

    /// Download, upload, then delete local and remote copies, per id
    Pipeline {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Delete without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Download everything pending, upload everything pending, regenerate the index
    Auto {
        /// Delete the local copy and the EPGStation recording once archived
        #[arg(long)]
        purge: bool,

        /// Also retry entries whose last download failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Upgrade records written by older versions
    Migrate,

    /// Re-verify downloads (CRC) and/or uploads (ETag)
    Check {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Check the download against the EPGStation log (default)
        #[arg(long = "dl", visible_alias = "epg")]
        download: bool,

        /// Check the upload against the stored object's ETag
        #[arg(long = "ul", visible_alias = "s3")]
        upload: bool,
    },

    /// Recreate the .log sidecar of archived recordings from the stored object
    GetCrc {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Build uploads.html and upload it
    #[command(visible_alias = "generate-html")]
    Generate,
}

impl Command {
    /// Commands that only read state run without the process lock.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Ls { .. } | Self::Info { .. } | Self::Free)
    }
}

impl AppConfig {
    /// Parse CLI args, then merge them over the process environment.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let cfg = Self::from_args(&args, |name| env::var(name).ok())?;
        Ok((cfg, args.command))
    }

    /// Merge parsed args over values from `lookup` (the environment in
    /// production, a map in tests). Empty values count as unset.
    pub fn from_args(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &str| {
            var(name).ok_or_else(|| anyhow!("environment variable {} is required", name))
        };

        // --- Environment fallback ---
        let epg_host = match &args.epg_host {
            Some(host) => host.clone(),
            None => required("EPG_HOST")?,
        };
        let epg_user = match &args.epg_user {
            Some(user) => user.clone(),
            None => required("EPG_USER")?,
        };
        let epg_password = match &args.epg_password {
            Some(password) => password.clone(),
            None => required("EPG_PASSWORD")?,
        };
        let epg_protocol = args
            .epg_protocol
            .clone()
            .or_else(|| var("EPG_PROTOCOL"))
            .unwrap_or_else(|| "http".into());

        let aws_region = required("AWS_REGION_NAME")?;
        let s3_endpoint_url = var("AWS_S3_ENDPOINT_URL")
            .unwrap_or_else(|| format!("https://{}.digitaloceanspaces.com", aws_region));
        let cdn_endpoint_url = var("CDN_ENDPOINT_URL").unwrap_or_else(|| s3_endpoint_url.clone());

        let directory = match &args.directory {
            Some(dir) => dir.clone(),
            None => var("DIRECTORY").map(PathBuf::from).unwrap_or_else(|| ".".into()),
        };
        let database_path = var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| directory.join("epg_downloader.db"));

        let http_timeout_secs = match var("EPG_HTTP_TIMEOUT") {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("parsing EPG_HTTP_TIMEOUT value `{}`", value))?,
            None => 30,
        };

        // --- Merge ---
        Ok(Self {
            epg_host,
            epg_protocol,
            epg_user,
            epg_password,
            aws_region,
            s3_endpoint_url,
            s3_bucket: required("AWS_STORAGE_BUCKET_NAME")?,
            s3_prefix: var("AWS_S3_PREFIX"),
            aws_access_key_id: var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            cdn_endpoint_url,
            key_prefix: var("KEY_PREFIX").unwrap_or_else(|| "epgd".into()),
            directory,
            database_path,
            http_timeout_secs,
        })
    }

    pub fn epg_base_url(&self) -> String {
        format!("{}://{}", self.epg_protocol, self.epg_host)
    }
}
