//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Backend URLs. Every entry can be overridden with its `ASTRAL_*_URL` variable.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Directory document publishing the media API base (`api`)
    pub media_directory: String,
    /// Directory document publishing the audio API base (`ary`)
    pub audio_directory: String,
    /// Directory document publishing the image-edit API base (`renz`)
    pub edit_directory: String,

    pub youtube_search: String,
    pub video_download: String,
    pub lyrics: String,

    pub claude: String,
    pub groq: String,
    pub gemini: String,
    pub copilot: String,
    pub christusgpt: String,
    pub lenna: String,
    pub xdash: String,

    pub midjourney: String,
    pub midjourney_task: String,
    pub flux: String,
    pub metagen: String,
    pub fast_draw: String,
    pub upscale: String,
    pub xl: String,
    pub dimage: String,
    pub magic_studio: String,
    pub neural_blender: String,
    pub pixarai: String,
    pub aiphoto: String,

    pub cosplay: String,
    pub goatstor: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            media_directory: "https://raw.githubusercontent.com/aryannix/stuffs/master/raw/apis.json".into(),
            audio_directory: "https://raw.githubusercontent.com/arychauhann/APIs/refs/heads/main/api.json".into(),
            edit_directory: "https://raw.githubusercontent.com/noobcore404/NC-STORE/main/NCApiUrl.json".into(),

            youtube_search: "https://yewtu.be/api/v1/search".into(),
            video_download: "https://downvid.onrender.com/api/v1/download".into(),
            lyrics: "https://lyricstx.vercel.app/youtube/lyrics".into(),

            claude: "https://redwans-apis.gleeze.com/api/claude-sonnet-4-5".into(),
            groq: "https://haji-mix-api.gleeze.com/api/groq".into(),
            gemini: "https://arychauhann.onrender.com/api/gemini-proxy2".into(),
            copilot: "https://christus-api.vercel.app/ai/copilot".into(),
            christusgpt: "https://rapido.zetsu.xyz/api/openai".into(),
            lenna: "https://arychauhann.onrender.com/api/lenna".into(),
            xdash: "https://haji-mix-api.gleeze.com/api/xdash".into(),

            midjourney: "https://dev.oculux.xyz/api/mj-proxy-pub".into(),
            midjourney_task: "https://www.noobs-apis.run.place/nazrul".into(),
            flux: "http://65.109.80.126:20511/api/flux1nm".into(),
            metagen: "https://metakexbyneokex.fly.dev/images/generate".into(),
            fast_draw: "https://mj-s6wm.onrender.com/draw".into(),
            upscale: "https://free-goat-api.onrender.com/4k".into(),
            xl: "https://arychauhann.onrender.com/api/xl".into(),
            dimage: "https://theone-fast-image-gen.vercel.app".into(),
            magic_studio: "https://free-goat-api.onrender.com/magicstudio".into(),
            neural_blender: "https://arychauhann.onrender.com/api/neuralblender".into(),
            pixarai: "https://arychauhann.onrender.com/api/pixarai".into(),
            aiphoto: "https://zetbot-page.onrender.com/api/aifreebox".into(),

            cosplay: "https://rapido.zetsu.xyz/api/cosplay".into(),
            goatstor: "https://goatstore.vercel.app".into(),
        }
    }
}

impl Endpoints {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            media_directory: env_or("ASTRAL_MEDIA_DIRECTORY_URL", d.media_directory),
            audio_directory: env_or("ASTRAL_AUDIO_DIRECTORY_URL", d.audio_directory),
            edit_directory: env_or("ASTRAL_EDIT_DIRECTORY_URL", d.edit_directory),
            youtube_search: env_or("ASTRAL_YOUTUBE_SEARCH_URL", d.youtube_search),
            video_download: env_or("ASTRAL_VIDEO_DOWNLOAD_URL", d.video_download),
            lyrics: env_or("ASTRAL_LYRICS_URL", d.lyrics),
            claude: env_or("ASTRAL_CLAUDE_URL", d.claude),
            groq: env_or("ASTRAL_GROQ_URL", d.groq),
            gemini: env_or("ASTRAL_GEMINI_URL", d.gemini),
            copilot: env_or("ASTRAL_COPILOT_URL", d.copilot),
            christusgpt: env_or("ASTRAL_CHRISTUSGPT_URL", d.christusgpt),
            lenna: env_or("ASTRAL_LENNA_URL", d.lenna),
            xdash: env_or("ASTRAL_XDASH_URL", d.xdash),
            midjourney: env_or("ASTRAL_MIDJOURNEY_URL", d.midjourney),
            midjourney_task: env_or("ASTRAL_MIDJOURNEY_TASK_URL", d.midjourney_task),
            flux: env_or("ASTRAL_FLUX_URL", d.flux),
            metagen: env_or("ASTRAL_METAGEN_URL", d.metagen),
            fast_draw: env_or("ASTRAL_FAST_DRAW_URL", d.fast_draw),
            upscale: env_or("ASTRAL_UPSCALE_URL", d.upscale),
            xl: env_or("ASTRAL_XL_URL", d.xl),
            dimage: env_or("ASTRAL_DIMAGE_URL", d.dimage),
            magic_studio: env_or("ASTRAL_MAGIC_STUDIO_URL", d.magic_studio),
            neural_blender: env_or("ASTRAL_NEURAL_BLENDER_URL", d.neural_blender),
            pixarai: env_or("ASTRAL_PIXARAI_URL", d.pixarai),
            aiphoto: env_or("ASTRAL_AIPHOTO_URL", d.aiphoto),
            cosplay: env_or("ASTRAL_COSPLAY_URL", d.cosplay),
            goatstor: env_or("ASTRAL_GOATSTOR_URL", d.goatstor),
        }
    }

    /// Every endpoint pointed at one base URL (test servers)
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let at = |path: &str| format!("{}{}", base, path);
        Self {
            media_directory: at("/directory/media.json"),
            audio_directory: at("/directory/audio.json"),
            edit_directory: at("/directory/edit.json"),
            youtube_search: at("/search"),
            video_download: at("/downvid"),
            lyrics: at("/lyrics"),
            claude: at("/claude"),
            groq: at("/groq"),
            gemini: at("/gemini"),
            copilot: at("/copilot"),
            christusgpt: at("/christusgpt"),
            lenna: at("/lenna"),
            xdash: at("/xdash"),
            midjourney: at("/mj"),
            midjourney_task: at("/nazrul"),
            flux: at("/flux"),
            metagen: at("/metagen"),
            fast_draw: at("/draw"),
            upscale: at("/4k"),
            xl: at("/xl"),
            dimage: at("/dimage"),
            magic_studio: at("/magicstudio"),
            neural_blender: at("/neuralblender"),
            pixarai: at("/pixarai"),
            aiphoto: at("/aiphoto"),
            cosplay: at("/cosplay"),
            goatstor: at("/goatstor"),
        }
    }
}

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (only needed in bot mode)
    pub telegram_token: Option<String>,

    /// Telegram user IDs allowed to use the bot; empty means everyone
    pub allowed_users: Vec<i64>,

    /// Command prefix
    pub prefix: String,

    /// Directory for transient downloads and composed images
    pub cache_dir: PathBuf,

    /// Pending selection lifetime; `None` disables expiry
    pub selection_ttl: Option<Duration>,

    /// How often expired selections are swept
    pub sweep_interval: Duration,

    /// How long API directory documents are cached
    pub directory_ttl: Duration,

    /// Default timeout for binary downloads
    pub download_timeout: Duration,

    pub endpoints: Endpoints,

    /// API key for the christusgpt backend, if it requires one
    pub christusgpt_key: Option<String>,

    /// API key for the cosplay video backend
    pub cosplay_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: None,
            allowed_users: Vec::new(),
            prefix: "/".to_string(),
            cache_dir: default_cache_dir(),
            selection_ttl: Some(Duration::from_secs(3600)),
            sweep_interval: Duration::from_secs(60),
            directory_ttl: Duration::from_secs(600),
            download_timeout: Duration::from_secs(120),
            endpoints: Endpoints::default(),
            christusgpt_key: None,
            cosplay_key: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let telegram_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let allowed_users = parse_user_list(&std::env::var("ASTRAL_ALLOWED_USERS").unwrap_or_default())?;

        let prefix = std::env::var("ASTRAL_COMMAND_PREFIX")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());

        let cache_dir = std::env::var("ASTRAL_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cache_dir());

        let selection_ttl = match secs_var("ASTRAL_SELECTION_TTL", 3600)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let sweep_interval = Duration::from_secs(secs_var("ASTRAL_SWEEP_INTERVAL", 60)?.max(1));
        let directory_ttl = Duration::from_secs(secs_var("ASTRAL_API_DIRECTORY_TTL", 600)?);
        let download_timeout = Duration::from_secs(secs_var("ASTRAL_DOWNLOAD_TIMEOUT", 120)?.max(1));

        Ok(Self {
            telegram_token,
            allowed_users,
            prefix,
            cache_dir,
            selection_ttl,
            sweep_interval,
            directory_ttl,
            download_timeout,
            endpoints: Endpoints::from_env(),
            christusgpt_key: std::env::var("ASTRAL_CHRISTUSGPT_KEY").ok().filter(|k| !k.is_empty()),
            cosplay_key: std::env::var("ASTRAL_COSPLAY_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("astralbot")
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn secs_var(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a number of seconds, got {:?}", name, v)),
        _ => Ok(default),
    }
}

fn parse_user_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid user id in ASTRAL_ALLOWED_USERS: {:?}", s))
        })
        .collect()
}
