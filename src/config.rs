use crate::error::{Result as WatchResult, WatchError};
use crate::events::KeyCombo;
use crate::services::capture::Region;
use crate::services::keycode_map::KeycodeMap;
use crate::services::detection_loop::DetectionConfig;
use crate::services::matcher::{ScaleSet, MIN_TEMPLATE_SIZE};
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const ENV_PREFIX: &str = "SIGNAL_WATCHER_";
pub const DEFAULT_HOTKEY: &str = "ctrl+alt+1";
pub const ADHOC_STRATEGY_NAME: &str = "cli";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub detection: DetectionDefaults,
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Значения по умолчанию для всех стратегий
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionDefaults {
    pub threshold: f64,
    pub cooldown_secs: f64,
    pub poll_interval_secs: f64,
    pub scales: Vec<f64>,
    pub capture_backoff_secs: f64,
    pub match_backoff_secs: f64,
    pub min_template_size: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    pub device_name: String,
    pub key_hold_ms: u64,
    pub focus_settle_ms: u64,
}

/// Одна стратегия = один независимый цикл
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub name: String,
    pub template: PathBuf,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_hotkey")]
    pub hotkey: String,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub cooldown_secs: Option<f64>,
    #[serde(default)]
    pub poll_interval_secs: Option<f64>,
    #[serde(default)]
    pub scales: Option<Vec<f64>>,
    #[serde(default)]
    pub capture_backoff_secs: Option<f64>,
    #[serde(default)]
    pub match_backoff_secs: Option<f64>,
    #[serde(default)]
    pub min_template_size: Option<u32>,
    #[serde(default)]
    pub focus_window: Option<String>,
    #[serde(default)]
    pub once: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_hotkey() -> String {
    DEFAULT_HOTKEY.to_string()
}

fn default_enabled() -> bool {
    true
}

/// Флаги командной строки, перекрывающие все остальные источники
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub log_level: Option<String>,
    pub template: Option<PathBuf>,
    pub name: Option<String>,
    pub threshold: Option<f64>,
    pub cooldown: Option<f64>,
    pub hotkey: Option<String>,
    pub region: Option<Region>,
    pub interval: Option<f64>,
    pub scales: Option<ScaleSet>,
    pub once: bool,
    pub focus_window: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            detection: DetectionDefaults::default(),
            dispatch: DispatchConfig::default(),
            strategies: Vec::new(),
        }
    }
}

impl Default for DetectionDefaults {
    fn default() -> Self {
        Self {
            threshold: 0.87,
            cooldown_secs: 3.0,
            poll_interval_secs: 0.4,
            scales: ScaleSet::default().into(),
            capture_backoff_secs: 0.5,
            match_backoff_secs: 1.0,
            min_template_size: MIN_TEMPLATE_SIZE,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            device_name: "Signal Watcher Virtual Keyboard".to_string(),
            key_hold_ms: 30,
            focus_settle_ms: 150,
        }
    }
}

impl Config {
    /// Значения по умолчанию -> TOML-файл -> переменные окружения
    pub fn figment<P: AsRef<Path>>(config_path: P) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load<P: AsRef<Path>>(config_path: P, overrides: &CliOverrides) -> Result<Self> {
        let config_path = config_path.as_ref();

        let mut config: Config = Self::figment(config_path)
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.apply_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    /// Применить флаги командной строки. С `--template` строится одна стратегия из флагов.
    pub fn apply_overrides(&mut self, cli: &CliOverrides) {
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }

        if let Some(template) = &cli.template {
            if !self.strategies.is_empty() {
                warn!("Указан --template: стратегии из конфигурации ({}) игнорируются", self.strategies.len());
            }
            self.strategies = vec![StrategyConfig {
                name: cli.name.clone().unwrap_or_else(|| ADHOC_STRATEGY_NAME.to_string()),
                template: template.clone(),
                region: cli.region,
                hotkey: cli.hotkey.clone().unwrap_or_else(default_hotkey),
                threshold: cli.threshold,
                cooldown_secs: cli.cooldown,
                poll_interval_secs: cli.interval,
                scales: cli.scales.clone().map(Into::into),
                capture_backoff_secs: None,
                match_backoff_secs: None,
                min_template_size: None,
                focus_window: cli.focus_window.clone(),
                once: cli.once,
                enabled: true,
            }];
            return;
        }

        for (flag, given) in [
            ("--hotkey", cli.hotkey.is_some()),
            ("--region", cli.region.is_some()),
            ("--name", cli.name.is_some()),
            ("--focus-window", cli.focus_window.is_some()),
        ] {
            if given {
                warn!("Флаг {} действует только вместе с --template и будет проигнорирован", flag);
            }
        }

        // Флаги детекции перекрывают и общие значения, и значения стратегий
        for strategy in &mut self.strategies {
            if cli.threshold.is_some() {
                strategy.threshold = cli.threshold;
            }
            if cli.cooldown.is_some() {
                strategy.cooldown_secs = cli.cooldown;
            }
            if cli.interval.is_some() {
                strategy.poll_interval_secs = cli.interval;
            }
            if let Some(scales) = &cli.scales {
                strategy.scales = Some(scales.clone().into());
            }
            strategy.once |= cli.once;
        }
        if let Some(threshold) = cli.threshold {
            self.detection.threshold = threshold;
        }
        if let Some(cooldown) = cli.cooldown {
            self.detection.cooldown_secs = cooldown;
        }
        if let Some(interval) = cli.interval {
            self.detection.poll_interval_secs = interval;
        }
        if let Some(scales) = &cli.scales {
            self.detection.scales = scales.clone().into();
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        self.detection.validate().context("Неверная секция [detection]")?;

        if self.dispatch.device_name.trim().is_empty() {
            anyhow::bail!("dispatch.device_name не может быть пустым");
        }

        // Валидация стратегий
        let mut names = HashSet::new();
        for (i, strategy) in self.strategies.iter().enumerate() {
            if !names.insert(strategy.name.as_str()) {
                anyhow::bail!("Повторяющееся имя стратегии '{}' (#{})", strategy.name, i + 1);
            }
            strategy
                .resolve(&self.detection)
                .with_context(|| format!("Неверная стратегия #{} '{}'", i + 1, strategy.name))?;
        }

        if self.enabled_strategies().next().is_none() {
            anyhow::bail!("Нет ни одной включённой стратегии: задайте [[strategies]] или --template");
        }

        Ok(())
    }

    pub fn enabled_strategies(&self) -> impl Iterator<Item = &StrategyConfig> {
        self.strategies.iter().filter(|s| s.enabled)
    }

    /// Разрешённые параметры всех включённых циклов
    pub fn detection_configs(&self) -> WatchResult<Vec<DetectionConfig>> {
        self.enabled_strategies()
            .map(|s| s.resolve(&self.detection))
            .collect()
    }
}

impl DetectionDefaults {
    pub fn validate(&self) -> WatchResult<()> {
        check_threshold(self.threshold)?;
        seconds("cooldown_secs", self.cooldown_secs)?;
        seconds("poll_interval_secs", self.poll_interval_secs)?;
        seconds("capture_backoff_secs", self.capture_backoff_secs)?;
        seconds("match_backoff_secs", self.match_backoff_secs)?;
        ScaleSet::new(self.scales.clone())?;
        if self.min_template_size == 0 {
            return WatchError::config("min_template_size должен быть не меньше 1");
        }
        Ok(())
    }
}

impl StrategyConfig {
    /// Объединить значения стратегии с общими и проверить результат
    pub fn resolve(&self, defaults: &DetectionDefaults) -> WatchResult<DetectionConfig> {
        if self.name.trim().is_empty() {
            return WatchError::config("Имя стратегии не может быть пустым");
        }
        if self.template.as_os_str().is_empty() {
            return WatchError::config(format!("[{}] Не указан путь к шаблону", self.name));
        }
        if let Some(region) = &self.region {
            region.validate()?;
        }

        let combo: KeyCombo = self.hotkey.parse()?;
        let only_modifiers = combo
            .keys()
            .iter()
            .all(|k| KeycodeMap::get_key_name(k.value()).is_some_and(KeycodeMap::is_modifier));
        if only_modifiers {
            return WatchError::config(format!("[{}] Комбинация '{}' состоит только из модификаторов", self.name, self.hotkey));
        }
        let threshold = self.threshold.unwrap_or(defaults.threshold);
        check_threshold(threshold)?;
        let scales = ScaleSet::new(self.scales.clone().unwrap_or_else(|| defaults.scales.clone()))?;

        let config = DetectionConfig {
            name: self.name.clone(),
            template_path: self.template.clone(),
            region: self.region,
            combo,
            threshold,
            poll_interval: seconds("poll_interval_secs", self.poll_interval_secs.unwrap_or(defaults.poll_interval_secs))?,
            cooldown: seconds("cooldown_secs", self.cooldown_secs.unwrap_or(defaults.cooldown_secs))?,
            scales,
            capture_backoff: seconds(
                "capture_backoff_secs",
                self.capture_backoff_secs.unwrap_or(defaults.capture_backoff_secs),
            )?,
            match_backoff: seconds("match_backoff_secs", self.match_backoff_secs.unwrap_or(defaults.match_backoff_secs))?,
            min_template_size: self.min_template_size.unwrap_or(defaults.min_template_size),
            focus_window: self.focus_window.clone().filter(|hint| !hint.trim().is_empty()),
            once: self.once,
        };
        config.validate()?;
        Ok(config)
    }
}

fn check_threshold(threshold: f64) -> WatchResult<()> {
    if threshold > 0.0 && threshold <= 1.0 {
        Ok(())
    } else {
        WatchError::config(format!("Порог должен быть в (0, 1]: {}", threshold))
    }
}

fn seconds(field: &str, value: f64) -> WatchResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| WatchError::Config(format!("{} должно быть неотрицательным числом секунд: {}", field, value)))
}
