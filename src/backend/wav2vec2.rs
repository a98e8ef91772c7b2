//! wav2vec2-for-CTC on candle.
//!
//! Supports both checkpoint layouts: the base models (`group` feature norm,
//! post-norm transformer) and the large "stable layer norm" models (`layer`
//! feature norm, pre-norm transformer). Inference runs on blocking worker
//! threads; the loaded model is shared read-only between requests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, GroupNorm, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use tokio::task;
use tracing::{debug, info};

use crate::backend::ctc::CtcVocabulary;
use crate::backend::{TranscribeRequest, Transcriber, TranscriptResult};
use crate::config::{AppConfig, DeviceKind};
use crate::error::AppError;
use crate::features::FeatureExtractorConfig;

/// Architecture fields of a Hugging Face `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Wav2Vec2Config {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub conv_dim: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    pub vocab_size: usize,
    #[serde(default)]
    pub pad_token_id: usize,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_feat_extract_norm")]
    pub feat_extract_norm: String,
    #[serde(default)]
    pub conv_bias: bool,
    #[serde(default)]
    pub do_stable_layer_norm: bool,
}

fn default_eps() -> f64 {
    1e-5
}

fn default_feat_extract_norm() -> String {
    "group".to_string()
}

impl Wav2Vec2Config {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let data = std::fs::read_to_string(path)
            .map_err(|err| AppError::internal(format!("failed to read {path:?}: {err}")))?;
        let cfg: Self = serde_json::from_str(&data)
            .map_err(|err| AppError::internal(format!("failed to parse {path:?}: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), AppError> {
        let layers = self.conv_dim.len();
        if layers == 0 || self.conv_kernel.len() != layers || self.conv_stride.len() != layers {
            return Err(AppError::config(
                "conv_dim, conv_kernel and conv_stride must be non-empty and equally long",
            ));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(AppError::config(format!(
                "hidden_size {} is not divisible by {} attention heads",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if !matches!(self.feat_extract_norm.as_str(), "group" | "layer") {
            return Err(AppError::config(format!(
                "unsupported feat_extract_norm={:?}",
                self.feat_extract_norm
            )));
        }
        Ok(())
    }

    /// Number of logit frames produced for `samples` input samples.
    pub fn output_frames(&self, samples: usize) -> usize {
        self.conv_kernel
            .iter()
            .zip(&self.conv_stride)
            .fold(samples, |len, (&kernel, &stride)| {
                if len < kernel {
                    0
                } else {
                    (len - kernel) / stride + 1
                }
            })
    }
}

// Feature encoder

/// The conv-stack norms keep the torch default regardless of `layer_norm_eps`.
const CONV_NORM_EPS: f64 = 1e-5;

struct ConvLayer {
    conv: Conv1d,
    norm: Option<ConvNorm>,
}

enum ConvNorm {
    Group(GroupNorm),
    Layer(LayerNorm),
}

impl ConvLayer {
    fn load(cfg: &Wav2Vec2Config, idx: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let in_c = if idx == 0 { 1 } else { cfg.conv_dim[idx - 1] };
        let out_c = cfg.conv_dim[idx];
        let conv_cfg = Conv1dConfig {
            stride: cfg.conv_stride[idx],
            ..Default::default()
        };
        let kernel = cfg.conv_kernel[idx];
        let conv = if cfg.conv_bias {
            candle_nn::conv1d(in_c, out_c, kernel, conv_cfg, vb.pp("conv"))?
        } else {
            candle_nn::conv1d_no_bias(in_c, out_c, kernel, conv_cfg, vb.pp("conv"))?
        };

        let norm = match (cfg.feat_extract_norm.as_str(), idx) {
            ("layer", _) => Some(ConvNorm::Layer(candle_nn::layer_norm(
                out_c,
                CONV_NORM_EPS,
                vb.pp("layer_norm"),
            )?)),
            // One group per channel, first layer only.
            ("group", 0) => Some(ConvNorm::Group(candle_nn::group_norm(
                out_c,
                out_c,
                CONV_NORM_EPS,
                vb.pp("layer_norm"),
            )?)),
            _ => None,
        };

        Ok(Self { conv, norm })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = match &self.norm {
            Some(ConvNorm::Group(norm)) => norm.forward(&xs)?,
            Some(ConvNorm::Layer(norm)) => norm
                .forward(&xs.transpose(1, 2)?)?
                .transpose(1, 2)?
                .contiguous()?,
            None => xs,
        };
        xs.gelu_erf()
    }
}

struct FeatureEncoder {
    layers: Vec<ConvLayer>,
}

impl FeatureEncoder {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let layers = (0..cfg.conv_dim.len())
            .map(|i| ConvLayer::load(cfg, i, vb.pp(format!("conv_layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.layers
            .iter()
            .try_fold(xs.clone(), |h, layer| layer.forward(&h))
    }
}

struct FeatureProjection {
    layer_norm: LayerNorm,
    projection: Linear,
}

impl FeatureProjection {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let dim = cfg.conv_dim[cfg.conv_dim.len() - 1];
        Ok(Self {
            layer_norm: candle_nn::layer_norm(dim, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            projection: candle_nn::linear(dim, cfg.hidden_size, vb.pp("projection"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.projection.forward(&self.layer_norm.forward(xs)?)
    }
}

// Positional convolution

/// Loads a grouped conv whose weight is stored weight-normalized.
///
/// Checkpoints store either `weight_g`/`weight_v` or the newer
/// `parametrizations.weight.original0`/`original1`; plain `weight` also works.
fn load_weight_norm_conv(
    channels: usize,
    kernel: usize,
    cfg: Conv1dConfig,
    vb: VarBuilder,
) -> candle_core::Result<Conv1d> {
    let per_group = channels / cfg.groups;
    let v_shape = (channels, per_group, kernel);
    let g_shape = (1, 1, kernel);

    let parametrized = vb.pp("parametrizations").pp("weight");
    let weight = if let (Ok(g), Ok(v)) = (vb.get(g_shape, "weight_g"), vb.get(v_shape, "weight_v")) {
        apply_weight_norm(&g, &v)?
    } else if let (Ok(g), Ok(v)) = (
        parametrized.get(g_shape, "original0"),
        parametrized.get(v_shape, "original1"),
    ) {
        apply_weight_norm(&g, &v)?
    } else {
        vb.get(v_shape, "weight")?
    };

    let bias = vb.get(channels, "bias")?;
    Ok(Conv1d::new(weight, Some(bias), cfg))
}

/// `weight = g * v / ||v||` with the norm taken over all but the kernel axis.
fn apply_weight_norm(g: &Tensor, v: &Tensor) -> candle_core::Result<Tensor> {
    let norm = v.sqr()?.sum_keepdim(0)?.sum_keepdim(1)?.sqrt()?;
    v.broadcast_div(&norm)?.broadcast_mul(g)
}

struct PositionalConv {
    conv: Conv1d,
}

impl PositionalConv {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let conv_cfg = Conv1dConfig {
            padding: cfg.num_conv_pos_embeddings / 2,
            groups: cfg.num_conv_pos_embedding_groups,
            ..Default::default()
        };
        Ok(Self {
            conv: load_weight_norm_conv(
                cfg.hidden_size,
                cfg.num_conv_pos_embeddings,
                conv_cfg,
                vb.pp("conv"),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let seq_len = xs.dim(1)?;
        // Even kernels yield one extra frame; keep the first `seq_len`.
        let h = self.conv.forward(&xs.transpose(1, 2)?.contiguous()?)?;
        h.narrow(2, 0, seq_len)?
            .gelu_erf()?
            .transpose(1, 2)?
            .contiguous()
    }
}

// Transformer encoder

struct SelfAttention {
    q: Linear,
    k: Linear,
    v: Linear,
    out: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl SelfAttention {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let head_dim = cfg.hidden_size / cfg.num_attention_heads;
        let h = cfg.hidden_size;
        Ok(Self {
            q: candle_nn::linear(h, h, vb.pp("q_proj"))?,
            k: candle_nn::linear(h, h, vb.pp("k_proj"))?,
            v: candle_nn::linear(h, h, vb.pp("v_proj"))?,
            out: candle_nn::linear(h, h, vb.pp("out_proj"))?,
            num_heads: cfg.num_attention_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        let split_heads = |x: Tensor| {
            x.reshape((b, t, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };

        let q = split_heads((self.q.forward(xs)? * self.scale)?)?;
        let k = split_heads(self.k.forward(xs)?)?;
        let v = split_heads(self.v.forward(xs)?)?;

        let scores = q.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let out = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        self.out.forward(&out)
    }
}

struct FeedForward {
    up: Linear,
    down: Linear,
}

impl FeedForward {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            up: candle_nn::linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                vb.pp("intermediate_dense"),
            )?,
            down: candle_nn::linear(
                cfg.intermediate_size,
                cfg.hidden_size,
                vb.pp("output_dense"),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.down.forward(&self.up.forward(xs)?.gelu_erf()?)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    layer_norm: LayerNorm,
    feed_forward: FeedForward,
    final_layer_norm: LayerNorm,
    pre_norm: bool,
}

impl EncoderLayer {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            attention: SelfAttention::load(cfg, vb.pp("attention"))?,
            layer_norm: candle_nn::layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            feed_forward: FeedForward::load(cfg, vb.pp("feed_forward"))?,
            final_layer_norm: candle_nn::layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("final_layer_norm"),
            )?,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        if self.pre_norm {
            let h = (xs + self.attention.forward(&self.layer_norm.forward(xs)?)?)?;
            return &h + self.feed_forward.forward(&self.final_layer_norm.forward(&h)?)?;
        }

        let h = self
            .layer_norm
            .forward(&(xs + self.attention.forward(xs)?)?)?;
        let h = (&h + self.feed_forward.forward(&h)?)?;
        self.final_layer_norm.forward(&h)
    }
}

struct Encoder {
    pos_conv: PositionalConv,
    layer_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    pre_norm: bool,
}

impl Encoder {
    fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| EncoderLayer::load(cfg, vb.pp(format!("layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            pos_conv: PositionalConv::load(cfg, vb.pp("pos_conv_embed"))?,
            layer_norm: candle_nn::layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            layers,
            pre_norm: cfg.do_stable_layer_norm,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = (xs + self.pos_conv.forward(xs)?)?;
        if !self.pre_norm {
            h = self.layer_norm.forward(&h)?;
        }
        for layer in &self.layers {
            h = layer.forward(&h)?;
        }
        if self.pre_norm {
            h = self.layer_norm.forward(&h)?;
        }
        Ok(h)
    }
}

/// Full CTC model: feature encoder, projection, transformer, and LM head.
pub struct Wav2Vec2ForCtc {
    feature_encoder: FeatureEncoder,
    feature_projection: FeatureProjection,
    encoder: Encoder,
    lm_head: Linear,
}

impl Wav2Vec2ForCtc {
    pub fn load(cfg: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let base = vb.pp("wav2vec2");
        Ok(Self {
            feature_encoder: FeatureEncoder::load(cfg, base.pp("feature_extractor"))?,
            feature_projection: FeatureProjection::load(cfg, base.pp("feature_projection"))?,
            encoder: Encoder::load(cfg, base.pp("encoder"))?,
            lm_head: candle_nn::linear(cfg.hidden_size, cfg.vocab_size, vb.pp("lm_head"))?,
        })
    }

    /// Maps `(batch, samples)` input values to `(batch, frames, vocab)` logits.
    pub fn forward(&self, input_values: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.feature_encoder.forward(&input_values.unsqueeze(1)?)?;
        let h = self
            .feature_projection
            .forward(&h.transpose(1, 2)?.contiguous()?)?;
        let h = self.encoder.forward(&h)?;
        self.lm_head.forward(&h)
    }
}

/// Picks the inference device.
pub fn select_device(kind: DeviceKind) -> Result<Device, AppError> {
    match kind {
        DeviceKind::Cpu => Ok(Device::Cpu),
        DeviceKind::Cuda => Device::new_cuda(0)
            .map_err(|err| AppError::config(format!("failed to initialize cuda device: {err}"))),
        DeviceKind::Metal => Device::new_metal(0)
            .map_err(|err| AppError::config(format!("failed to initialize metal device: {err}"))),
        DeviceKind::Auto => {
            if candle_core::utils::cuda_is_available() {
                if let Ok(device) = Device::new_cuda(0) {
                    return Ok(device);
                }
            }
            if candle_core::utils::metal_is_available() {
                if let Ok(device) = Device::new_metal(0) {
                    return Ok(device);
                }
            }
            Ok(Device::Cpu)
        }
    }
}

struct Wav2Vec2Inner {
    model: Wav2Vec2ForCtc,
    config: Wav2Vec2Config,
    vocab: CtcVocabulary,
    features: FeatureExtractorConfig,
    device: Device,
}

/// Local inference backend backed by a wav2vec2 CTC checkpoint.
pub struct Wav2Vec2Backend {
    inner: Arc<Wav2Vec2Inner>,
}

impl Wav2Vec2Backend {
    /// Loads config, vocabulary, preprocessor settings, and weights from `cfg.model_dir`.
    pub fn load(cfg: &AppConfig) -> Result<Self, AppError> {
        let device = select_device(cfg.device)?;
        let config = Wav2Vec2Config::load(&cfg.config_path())?;
        let vocab =
            CtcVocabulary::load(&cfg.vocab_path(), config.pad_token_id, config.vocab_size)?;
        let features = FeatureExtractorConfig::load_or_default(&cfg.preprocessor_path())?;

        let weights_path = cfg.weights_path();
        let weights = std::fs::read(&weights_path).map_err(|err| {
            AppError::internal(format!("failed to read weights {weights_path:?}: {err}"))
        })?;
        let vb = VarBuilder::from_buffered_safetensors(weights, DType::F32, &device)
            .map_err(|err| AppError::internal(format!("failed to load safetensors: {err}")))?;
        let model = Wav2Vec2ForCtc::load(&config, vb).map_err(|err| {
            AppError::internal(format!(
                "failed to build wav2vec2 model from {:?}: {err}",
                cfg.model_dir
            ))
        })?;

        info!(
            model_dir = ?cfg.model_dir,
            device = ?device,
            hidden_size = config.hidden_size,
            layers = config.num_hidden_layers,
            vocab = vocab.len(),
            stable_layer_norm = config.do_stable_layer_norm,
            "wav2vec2 model loaded"
        );

        Ok(Self::from_parts(model, config, vocab, features, device))
    }

    pub fn from_parts(
        model: Wav2Vec2ForCtc,
        config: Wav2Vec2Config,
        vocab: CtcVocabulary,
        features: FeatureExtractorConfig,
        device: Device,
    ) -> Self {
        Self {
            inner: Arc::new(Wav2Vec2Inner {
                model,
                config,
                vocab,
                features,
                device,
            }),
        }
    }
}

#[async_trait]
impl Transcriber for Wav2Vec2Backend {
    async fn transcribe(&self, req: TranscribeRequest) -> Result<TranscriptResult, AppError> {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || run_ctc(&inner, &req.audio_16khz_mono_f32))
            .await
            .map_err(|err| AppError::inference(format!("wav2vec2 worker task failed: {err}")))?
    }
}

fn run_ctc(inner: &Wav2Vec2Inner, samples: &[f32]) -> Result<TranscriptResult, AppError> {
    let expected_frames = inner.config.output_frames(samples.len());
    if expected_frames == 0 {
        return Err(AppError::audio_decode(format!(
            "audio too short for the model: {} samples",
            samples.len()
        )));
    }

    let input_values = inner.features.extract(samples);
    let input = Tensor::from_vec(input_values, (1, samples.len()), &inner.device)
        .map_err(|err| AppError::inference(format!("failed to build input tensor: {err}")))?;

    let logits = inner
        .model
        .forward(&input)
        .map_err(|err| AppError::inference(format!("wav2vec2 forward pass failed: {err}")))?;

    let frame_ids = logits
        .squeeze(0)
        .and_then(|t| t.argmax(D::Minus1))
        .and_then(|t| t.to_vec1::<u32>())
        .map_err(|err| AppError::inference(format!("failed to decode logits: {err}")))?;

    let text = inner.vocab.decode(&frame_ids);
    debug!(
        samples = samples.len(),
        frames = frame_ids.len(),
        chars = text.len(),
        "ctc decode complete"
    );

    Ok(TranscriptResult {
        text,
        frames: frame_ids.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use candle_core::Var;
    use candle_nn::VarMap;

    use super::*;

    const POS_CONV: &str = "wav2vec2.encoder.pos_conv_embed.conv";

    fn tiny_config(stable: bool) -> Wav2Vec2Config {
        let feat_extract_norm = if stable { "layer" } else { "group" };
        serde_json::from_value(serde_json::json!({
            "hidden_size": 8,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "conv_dim": [4, 4],
            "conv_kernel": [10, 3],
            "conv_stride": [5, 2],
            "num_conv_pos_embeddings": 4,
            "num_conv_pos_embedding_groups": 2,
            "vocab_size": 6,
            "feat_extract_norm": feat_extract_norm,
            "do_stable_layer_norm": stable,
        }))
        .unwrap()
    }

    fn tiny_vocab() -> CtcVocabulary {
        let map: HashMap<String, usize> = ["<pad>", "<s>", "</s>", "<unk>", "|", "A"]
            .iter()
            .enumerate()
            .map(|(id, t)| (t.to_string(), id))
            .collect();
        CtcVocabulary::from_map(map, 0, 6).unwrap()
    }

    /// A var map with `entries` fixed; everything else gets the layer's default init.
    fn seeded_varmap(entries: Vec<(String, Tensor)>) -> VarMap {
        let varmap = VarMap::new();
        {
            let mut data = varmap.data().lock().unwrap();
            for (name, tensor) in entries {
                data.insert(name, Var::from_tensor(&tensor).unwrap());
            }
        }
        varmap
    }

    /// Finite positional conv and an LM head whose bias alone picks token `winner`.
    fn head_biased_varmap(winner: usize) -> VarMap {
        let dev = Device::Cpu;
        let mut bias = vec![0f32; 6];
        bias[winner] = 5.0;
        seeded_varmap(vec![
            (
                format!("{POS_CONV}.weight_g"),
                Tensor::ones((1, 1, 4), DType::F32, &dev).unwrap(),
            ),
            (
                format!("{POS_CONV}.weight_v"),
                Tensor::ones((8, 4, 4), DType::F32, &dev).unwrap(),
            ),
            (
                "lm_head.weight".to_string(),
                Tensor::zeros((6, 8), DType::F32, &dev).unwrap(),
            ),
            ("lm_head.bias".to_string(), Tensor::new(bias, &dev).unwrap()),
        ])
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.05).sin() * 0.3).collect()
    }

    fn assert_close(tensor: &Tensor, expected: &[f32]) {
        let got = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-4, "{got:?} != {expected:?}");
        }
    }

    // v = [[[3, 0]], [[4, 1]]]: per-kernel-tap norms are 5 and 1.
    fn weight_norm_parts() -> (Tensor, Tensor) {
        let dev = Device::Cpu;
        let g = Tensor::new(&[[[10f32, 2.]]], &dev).unwrap();
        let v = Tensor::new(&[[[3f32, 0.]], [[4., 1.]]], &dev).unwrap();
        (g, v)
    }

    fn grouped_conv_cfg() -> Conv1dConfig {
        Conv1dConfig {
            groups: 2,
            ..Default::default()
        }
    }

    #[test]
    fn config_defaults_match_base_checkpoints() {
        let cfg = tiny_config(false);
        assert_eq!(cfg.pad_token_id, 0);
        assert!(!cfg.conv_bias);
        assert_eq!(cfg.layer_norm_eps, 1e-5);
    }

    #[test]
    fn output_frames_follow_conv_arithmetic() {
        let cfg = tiny_config(false);
        assert_eq!(cfg.output_frames(400), 39);
        assert_eq!(cfg.output_frames(9), 0);
    }

    #[test]
    fn invalid_conv_lists_are_rejected() {
        let mut cfg = tiny_config(false);
        cfg.conv_stride.pop();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn weight_norm_scales_each_kernel_tap() {
        let (g, v) = weight_norm_parts();
        let weight = apply_weight_norm(&g, &v).unwrap();
        assert_eq!(weight.dims(), &[2, 1, 2]);
        assert_close(&weight, &[6.0, 0.0, 8.0, 2.0]);
    }

    #[test]
    fn parametrized_weight_norm_names_are_loaded() {
        let dev = Device::Cpu;
        let (g, v) = weight_norm_parts();
        let tensors = HashMap::from([
            ("parametrizations.weight.original0".to_string(), g),
            ("parametrizations.weight.original1".to_string(), v),
            (
                "bias".to_string(),
                Tensor::zeros(2, DType::F32, &dev).unwrap(),
            ),
        ]);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &dev);
        let conv = load_weight_norm_conv(2, 2, grouped_conv_cfg(), vb).unwrap();
        assert_close(conv.weight(), &[6.0, 0.0, 8.0, 2.0]);
    }

    #[test]
    fn plain_conv_weight_is_used_as_is() {
        let dev = Device::Cpu;
        let (_, v) = weight_norm_parts();
        let tensors = HashMap::from([
            ("weight".to_string(), v),
            (
                "bias".to_string(),
                Tensor::zeros(2, DType::F32, &dev).unwrap(),
            ),
        ]);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &dev);
        let conv = load_weight_norm_conv(2, 2, grouped_conv_cfg(), vb).unwrap();
        assert_close(conv.weight(), &[3.0, 0.0, 4.0, 1.0]);
    }

    #[test]
    fn conv_layer_norm_ignores_model_layer_norm_eps() {
        let dev = Device::Cpu;
        let mut cfg = tiny_config(true);
        cfg.layer_norm_eps = 10.0;

        // Channel c has every tap equal to c, so a window of ones yields 10 * c.
        let weight = Tensor::arange(0f32, 4., &dev)
            .and_then(|t| t.reshape((4, 1, 1)))
            .and_then(|t| t.broadcast_as((4, 1, 10)))
            .and_then(|t| t.contiguous())
            .unwrap();
        let varmap = seeded_varmap(vec![("conv.weight".to_string(), weight)]);
        let layer = ConvLayer::load(&cfg, 0, VarBuilder::from_varmap(&varmap, DType::F32, &dev))
            .unwrap();

        let input = Tensor::ones((1, 1, 10), DType::F32, &dev).unwrap();
        let out = layer.forward(&input).unwrap();

        let scale = 10.0 / (125.0f32 + 1e-5).sqrt();
        let normalized: Vec<f32> = (0..4).map(|c| (c as f32 - 1.5) * scale).collect();
        let expected = Tensor::new(normalized, &dev)
            .and_then(|t| t.gelu_erf())
            .and_then(|t| t.to_vec1::<f32>())
            .unwrap();
        assert_eq!(out.dims(), &[1, 4, 1]);
        assert_close(&out, &expected);
    }

    #[test]
    fn forward_produces_finite_frame_by_vocab_logits() {
        for stable in [false, true] {
            let cfg = tiny_config(stable);
            let varmap = head_biased_varmap(5);
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let model = Wav2Vec2ForCtc::load(&cfg, vb).unwrap();
            let input = Tensor::new(ramp(400), &Device::Cpu)
                .and_then(|t| t.unsqueeze(0))
                .unwrap();
            let logits = model.forward(&input).unwrap();
            assert_eq!(logits.dims(), &[1, 39, 6]);

            let values = logits.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(values.iter().all(|v| v.is_finite()));
        }
    }

    #[tokio::test]
    async fn transcribe_decodes_the_winning_token() {
        let cfg = tiny_config(false);
        let varmap = head_biased_varmap(5);
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Wav2Vec2ForCtc::load(&cfg, vb).unwrap();
        let expected_frames = cfg.output_frames(400);
        let backend = Wav2Vec2Backend::from_parts(
            model,
            cfg,
            tiny_vocab(),
            FeatureExtractorConfig::default(),
            Device::Cpu,
        );

        let result = backend
            .transcribe(TranscribeRequest {
                audio_16khz_mono_f32: ramp(400),
            })
            .await
            .unwrap();
        assert_eq!(result.text, "A");
        assert_eq!(result.frames, expected_frames);
    }

    #[tokio::test]
    async fn short_audio_is_rejected_before_inference() {
        let cfg = tiny_config(false);
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = Wav2Vec2ForCtc::load(&cfg, vb).unwrap();
        let backend = Wav2Vec2Backend::from_parts(
            model,
            cfg,
            tiny_vocab(),
            FeatureExtractorConfig::default(),
            Device::Cpu,
        );
        let err = backend
            .transcribe(TranscribeRequest {
                audio_16khz_mono_f32: vec![0.0; 5],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AudioDecode(_)));
    }
}
