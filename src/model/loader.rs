use std::sync::Arc;

use parking_lot::Mutex;
use tch::{CModule, Device, IValue, Kind, Tensor, no_grad};
use tokenizers::{FromPretrainedParameters, PaddingParams, Tokenizer, TruncationParams};

use crate::{
    config::AppConfig,
    error::{GenerationError, InitError},
    model::types::ModelInfo,
    sampling::{self, SamplingOptions},
};

/// End-of-sequence candidates probed when the config does not name one.
/// Covers the Qwen, GPT-2 and Llama tokenizer families.
const EOS_CANDIDATES: &[&str] = &["<|im_end|>", "<|endoftext|>", "</s>", "<|end_of_text|>"];

#[derive(Debug, Clone, Copy)]
pub struct SpecialTokens {
    pub eos_id: i64,
    pub pad_id: i64,
}

pub struct ModelArtifacts {
    pub tokenizer: Arc<Tokenizer>,
    pub model: ModelInstance,
}

pub struct ModelInstance {
    model_id: String,
    device: Device,
    kind: Kind,
    special: SpecialTokens,
    // The mutex serializes concurrent generations on the single model
    // resource; the Option makes release() idempotent.
    module: Mutex<Option<CModule>>,
}

impl ModelArtifacts {
    pub fn load(config: &AppConfig) -> Result<Self, InitError> {
        let mut tokenizer = load_tokenizer(config)?;

        let special = resolve_special_tokens(&tokenizer, config.eos_token.as_deref())
            .ok_or_else(|| {
                InitError::Tokenizer(format!(
                    "no end-of-sequence token found in the vocabulary of {}",
                    config.model_id
                ))
            })?;
        ensure_padding(&mut tokenizer, special);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.sampling.max_input_tokens,
                ..TruncationParams::default()
            }))
            .map_err(|e| InitError::Tokenizer(e.to_string()))?;

        let model = ModelInstance::load(config, special)?;

        Ok(Self {
            tokenizer: Arc::new(tokenizer),
            model,
        })
    }
}

fn load_tokenizer(config: &AppConfig) -> Result<Tokenizer, InitError> {
    if let Some(path) = config.tokenizer_path.as_ref() {
        if path.exists() {
            return Tokenizer::from_file(path).map_err(|e| InitError::Tokenizer(e.to_string()));
        }
        tracing::warn!(path = %path.display(), "tokenizer file missing, fetching from hub");
    }
    let params = FromPretrainedParameters {
        revision: config.revision.clone().unwrap_or_else(|| "main".to_string()),
        auth_token: config.hf_token.clone(),
        ..FromPretrainedParameters::default()
    };
    Tokenizer::from_pretrained(&config.model_id, Some(params))
        .map_err(|e| InitError::Tokenizer(e.to_string()))
}

/// Resolve the generation-boundary token ids. The pad id falls back to the
/// eos id when the tokenizer defines no padding.
fn resolve_special_tokens(tokenizer: &Tokenizer, eos_override: Option<&str>) -> Option<SpecialTokens> {
    let eos_id = eos_override
        .into_iter()
        .chain(EOS_CANDIDATES.iter().copied())
        .find_map(|token| tokenizer.token_to_id(token))?;
    let pad_id = tokenizer.get_padding().map(|p| p.pad_id).unwrap_or(eos_id);
    Some(SpecialTokens {
        eos_id: i64::from(eos_id),
        pad_id: i64::from(pad_id),
    })
}

fn ensure_padding(tokenizer: &mut Tokenizer, special: SpecialTokens) {
    if tokenizer.get_padding().is_some() {
        return;
    }
    let pad_token = tokenizer
        .id_to_token(special.pad_id as u32)
        .unwrap_or_else(|| "<|endoftext|>".to_string());
    tokenizer.with_padding(Some(PaddingParams {
        pad_id: special.pad_id as u32,
        pad_token,
        ..PaddingParams::default()
    }));
}

impl ModelInstance {
    pub fn load(config: &AppConfig, special: SpecialTokens) -> Result<Self, InitError> {
        let path = config.module_path.as_path();
        if !path.exists() {
            return Err(InitError::Model(format!(
                "model artifact missing: {}",
                path.display()
            )));
        }

        let device = config.device;
        // Reduced precision on the accelerator, full precision on CPU.
        let kind = if device.is_cuda() { Kind::Half } else { Kind::Float };

        let mut module = CModule::load_on_device(path, device)
            .map_err(|e| InitError::Model(e.to_string()))?;
        module.set_eval();
        if kind == Kind::Half {
            module.to(device, kind, false);
        }

        tracing::info!(
            model_id = %config.model_id,
            device = %device_label(device),
            dtype = kind_label(kind),
            "model loaded"
        );

        Ok(Self {
            model_id: config.model_id.clone(),
            device,
            kind,
            special,
            module: Mutex::new(Some(module)),
        })
    }

    /// Best-effort introspection record. Partial failures land in the
    /// `error` field instead of failing the call.
    pub fn describe(&self) -> ModelInfo {
        let mut info = ModelInfo {
            model_name: self.model_id.clone(),
            device: device_label(self.device),
            dtype: kind_label(self.kind).to_string(),
            parameters: None,
            error: None,
        };

        let guard = self.module.lock();
        match guard.as_ref() {
            Some(module) => match module.named_parameters() {
                Ok(params) => {
                    let total: usize = params.iter().map(|(_, t)| t.numel()).sum();
                    info.parameters = Some(format!("{:.2}M", total as f64 / 1e6));
                }
                Err(e) => {
                    info.error = Some(format!("could not inspect parameters: {e}"));
                }
            },
            None => {
                info.error = Some("model resources have been released".to_string());
            }
        }
        info
    }

    /// Free the model resources. Idempotent; later generations report a
    /// released-model failure instead of touching freed memory.
    pub fn release(&self) {
        let dropped = self.module.lock().take();
        if dropped.is_some() {
            drop(dropped);
            if let Device::Cuda(index) = self.device {
                tch::Cuda::synchronize(index as i64);
            }
            tracing::info!("model resources released");
        }
    }

    /// Run one blocking autoregressive generation for an already-built
    /// prompt and return only the decoded continuation.
    pub fn generate(
        &self,
        tokenizer: &Tokenizer,
        prompt: &str,
        opts: &SamplingOptions,
    ) -> Result<String, GenerationError> {
        let encoding = tokenizer
            .encode(prompt, true)
            .map_err(|e| GenerationError::Tokenizer(e.to_string()))?;
        let mut token_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| i64::from(id)).collect();
        if token_ids.is_empty() {
            token_ids.push(self.special.eos_id);
        }
        let prompt_len = token_ids.len();
        let mut rng = rand::thread_rng();

        no_grad(|| {
            let guard = self.module.lock();
            let module = guard.as_ref().ok_or(GenerationError::Released)?;

            for _ in 0..opts.max_new_tokens {
                let input = Tensor::from_slice(&token_ids)
                    .reshape([1, token_ids.len() as i64])
                    .to(self.device);

                let output = module
                    .forward_is(&[IValue::Tensor(input)])
                    .map_err(|e| GenerationError::Inference(e.to_string()))?;

                // Traced causal LMs return either bare logits or a
                // (logits, past) tuple.
                let logits = match output {
                    IValue::Tensor(t) => t,
                    IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                        IValue::Tensor(t) => t.shallow_clone(),
                        _ => {
                            return Err(GenerationError::Inference(
                                "expected tensor as first tuple element".into(),
                            ));
                        }
                    },
                    _ => {
                        return Err(GenerationError::Inference(
                            "unexpected model output format".into(),
                        ));
                    }
                };

                // Last-position logits, shape [vocab_size], on the host.
                let last_logits = logits
                    .select(1, -1)
                    .squeeze()
                    .to_kind(Kind::Float)
                    .to(Device::Cpu);
                let scores = Vec::<f32>::try_from(&last_logits)
                    .map_err(|e| GenerationError::Inference(e.to_string()))?;

                let next = sampling::sample_token(&scores, opts, &mut rng) as i64;
                token_ids.push(next);

                if next == self.special.eos_id || next == self.special.pad_id {
                    break;
                }
            }

            Ok::<(), GenerationError>(())
        })?;

        let generated: Vec<u32> = token_ids[prompt_len..]
            .iter()
            .map(|&id| id as u32)
            .collect();
        let answer = tokenizer
            .decode(&generated, true)
            .map_err(|e| GenerationError::Tokenizer(e.to_string()))?;

        Ok(answer.trim().to_string())
    }
}

fn device_label(device: Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(index) => format!("cuda:{index}"),
        other => format!("{other:?}").to_lowercase(),
    }
}

fn kind_label(kind: Kind) -> &'static str {
    match kind {
        Kind::Half => "float16",
        Kind::Float => "float32",
        _ => "unknown",
    }
}
