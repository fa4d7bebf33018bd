use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use tch::Device;

use crate::sampling::SamplingOptions;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub revision: Option<String>,
    /// TorchScript export of the causal LM.
    pub module_path: PathBuf,
    /// Local tokenizer.json; fetched from the hub by `model_id` when unset
    /// or missing.
    pub tokenizer_path: Option<PathBuf>,
    pub hf_token: Option<String>,
    /// End-of-sequence token override for tokenizers with unusual vocabularies.
    pub eos_token: Option<String>,
    pub sampling: SamplingOptions,
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let model_id = env::var("MODEL_ID").unwrap_or_else(|_| "Qwen/Qwen3-0.6B".to_string());
        let revision = env::var("MODEL_REVISION").ok();
        let module_path = PathBuf::from(
            env::var("MODULE_PATH").unwrap_or_else(|_| "models/business_consultant.ts".to_string()),
        );
        let tokenizer_path = env::var("TOKENIZER_PATH").ok().map(PathBuf::from);
        let hf_token = env::var("HF_TOKEN").ok();
        let eos_token = env::var("EOS_TOKEN").ok();

        let defaults = SamplingOptions::default();
        let sampling = SamplingOptions {
            max_new_tokens: env::var("MAX_NEW_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_new_tokens),
            temperature: env::var("TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.temperature),
            top_p: env::var("TOP_P")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.top_p),
            do_sample: env::var("DO_SAMPLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.do_sample),
            max_input_tokens: env::var("MAX_INPUT_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_input_tokens),
        };

        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "auto".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_id,
            revision,
            module_path,
            tokenizer_path,
            hf_token,
            eos_token,
            sampling,
            device,
        })
    }
}

fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "auto" {
        Device::cuda_if_available()
    } else if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
