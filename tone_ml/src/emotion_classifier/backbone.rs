//! A wav2vec2-base style speech encoder.
//!
//! Field names mirror the torchaudio `Wav2Vec2Model` state dict (after stripping `encoder.transformer.`), so a
//! pretrained checkpoint can be imported with a couple of key remaps.

use burn::module::Param;
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{Dropout, DropoutConfig, GroupNorm, GroupNormConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::{gelu, softmax};
use burn::tensor::module::conv1d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::Distribution;

#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Output channels of each convolutional feature extractor layer.
    #[config(default = "vec![512; 7]")]
    pub conv_dim: Vec<usize>,
    #[config(default = "vec![10, 3, 3, 3, 3, 2, 2]")]
    pub conv_kernel: Vec<usize>,
    #[config(default = "vec![5, 2, 2, 2, 2, 2, 2]")]
    pub conv_stride: Vec<usize>,
    #[config(default = false)]
    pub conv_bias: bool,
    #[config(default = 768)]
    pub hidden_size: usize,
    #[config(default = 12)]
    pub num_layers: usize,
    #[config(default = 12)]
    pub num_heads: usize,
    #[config(default = 3072)]
    pub intermediate_size: usize,
    #[config(default = 128)]
    pub pos_conv_kernel: usize,
    #[config(default = 16)]
    pub pos_conv_groups: usize,
    #[config(default = 1e-5)]
    pub layer_norm_eps: f64,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let conv_layers = self
            .conv_dim
            .iter()
            .enumerate()
            .map(|(i, &out_c)| {
                let in_c = if i == 0 { 1 } else { self.conv_dim[i - 1] };
                ConvLayerBlock {
                    conv: Conv1dConfig::new(in_c, out_c, self.conv_kernel[i])
                        .with_stride(self.conv_stride[i])
                        .with_bias(self.conv_bias)
                        .init(device),
                    // wav2vec2-base only normalises the first layer, with one group per channel.
                    layer_norm: (i == 0).then(|| GroupNormConfig::new(out_c, out_c).init(device)),
                }
            })
            .collect();

        let extracted = *self.conv_dim.last().unwrap_or(&self.hidden_size);

        let feature_projection = FeatureProjection {
            layer_norm: LayerNormConfig::new(extracted).with_epsilon(self.layer_norm_eps).init(device),
            projection: LinearConfig::new(extracted, self.hidden_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        };

        let group_width = self.hidden_size / self.pos_conv_groups;
        let pos_conv_embed = PosConvEmbed {
            weight_g: Param::from_tensor(Tensor::ones([1, 1, self.pos_conv_kernel], device)),
            weight_v: Param::from_tensor(Tensor::random(
                [self.hidden_size, group_width, self.pos_conv_kernel],
                Distribution::Normal(0.0, (1.0 / (group_width * self.pos_conv_kernel) as f64).sqrt()),
                device,
            )),
            bias: Param::from_tensor(Tensor::zeros([self.hidden_size], device)),
            kernel_size: self.pos_conv_kernel,
            groups: self.pos_conv_groups,
        };

        let layers = (0..self.num_layers).map(|_| self.init_encoder_layer(device)).collect();

        Backbone {
            feature_extractor: FeatureExtractor { conv_layers },
            encoder: Encoder {
                feature_projection,
                pos_conv_embed,
                layer_norm: LayerNormConfig::new(self.hidden_size).with_epsilon(self.layer_norm_eps).init(device),
                layers,
                dropout: DropoutConfig::new(self.dropout).init(),
            },
        }
    }

    fn init_encoder_layer<B: Backend>(&self, device: &B::Device) -> EncoderLayer<B> {
        let hidden = self.hidden_size;
        EncoderLayer {
            attention: SelfAttention {
                q_proj: LinearConfig::new(hidden, hidden).init(device),
                k_proj: LinearConfig::new(hidden, hidden).init(device),
                v_proj: LinearConfig::new(hidden, hidden).init(device),
                out_proj: LinearConfig::new(hidden, hidden).init(device),
                num_heads: self.num_heads,
                head_dim: hidden / self.num_heads,
            },
            dropout: DropoutConfig::new(self.dropout).init(),
            layer_norm: LayerNormConfig::new(hidden).with_epsilon(self.layer_norm_eps).init(device),
            feed_forward: FeedForward {
                intermediate_dense: LinearConfig::new(hidden, self.intermediate_size).init(device),
                output_dense: LinearConfig::new(self.intermediate_size, hidden).init(device),
                dropout: DropoutConfig::new(self.dropout).init(),
            },
            final_layer_norm: LayerNormConfig::new(hidden).with_epsilon(self.layer_norm_eps).init(device),
        }
    }

    /// Amount of encoder frames produced for `samples` input samples.
    pub fn output_frames(&self, samples: usize) -> usize {
        self.conv_kernel
            .iter()
            .zip(&self.conv_stride)
            .fold(samples, |len, (kernel, stride)| len.saturating_sub(*kernel) / stride + 1)
    }
}

#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub feature_extractor: FeatureExtractor<B>,
    pub encoder: Encoder<B>,
}

impl<B: Backend> Backbone<B> {
    /// # Shapes
    ///   - Waveform [batch_size, samples]
    ///   - Output, one entry per encoder layer: [batch_size, frames, hidden_size]
    pub fn forward(&self, waveform: Tensor<B, 2>) -> Vec<Tensor<B, 3>> {
        let features = self.feature_extractor.forward(waveform);
        self.encoder.forward(features)
    }

    /// Disable gradients for the first `n` encoder layers.
    pub fn freeze_layers(mut self, n: usize) -> Self {
        self.encoder.layers = self
            .encoder
            .layers
            .into_iter()
            .enumerate()
            .map(|(i, layer)| if i < n { layer.no_grad() } else { layer })
            .collect();
        self
    }

    pub fn num_layers(&self) -> usize {
        self.encoder.layers.len()
    }
}

#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    pub conv_layers: Vec<ConvLayerBlock<B>>,
}

impl<B: Backend> FeatureExtractor<B> {
    /// Returns [batch_size, frames, channels]
    pub fn forward(&self, waveform: Tensor<B, 2>) -> Tensor<B, 3> {
        let mut x = waveform.unsqueeze_dim::<3>(1);
        for layer in &self.conv_layers {
            x = layer.forward(x);
        }

        x.swap_dims(1, 2)
    }
}

#[derive(Module, Debug)]
pub struct ConvLayerBlock<B: Backend> {
    pub conv: Conv1d<B>,
    pub layer_norm: Option<GroupNorm<B>>,
}

impl<B: Backend> ConvLayerBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.conv.forward(x);
        let x = match &self.layer_norm {
            Some(norm) => norm.forward(x),
            None => x,
        };

        gelu(x)
    }
}

#[derive(Module, Debug)]
pub struct FeatureProjection<B: Backend> {
    pub layer_norm: LayerNorm<B>,
    pub projection: Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> FeatureProjection<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.layer_norm.forward(x);
        self.dropout.forward(self.projection.forward(x))
    }
}

/// Grouped convolution over time with a weight-normalised kernel.
#[derive(Module, Debug)]
pub struct PosConvEmbed<B: Backend> {
    /// Magnitude, normalised over all but the kernel axis: [1, 1, kernel_size]
    pub weight_g: Param<Tensor<B, 3>>,
    /// Direction: [channels, channels / groups, kernel_size]
    pub weight_v: Param<Tensor<B, 3>>,
    pub bias: Param<Tensor<B, 1>>,
    pub kernel_size: usize,
    pub groups: usize,
}

impl<B: Backend> PosConvEmbed<B> {
    /// # Shapes
    ///   - Input/Output [batch_size, frames, hidden_size]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, frames, hidden] = x.dims();
        let weight_v = self.weight_v.val();
        let norm = weight_v.clone().powf_scalar(2.0).sum_dim(0).sum_dim(1).sqrt();
        let weight = weight_v / norm * self.weight_g.val();

        let options = ConvOptions::new([1], [self.kernel_size / 2], [1], self.groups);
        let out = conv1d(x.swap_dims(1, 2), weight, Some(self.bias.val()), options);
        // An even kernel produces one frame too many.
        let out = out.slice([0..batch, 0..hidden, 0..frames]);

        gelu(out).swap_dims(1, 2)
    }
}

#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    pub q_proj: Linear<B>,
    pub k_proj: Linear<B>,
    pub v_proj: Linear<B>,
    pub out_proj: Linear<B>,
    pub num_heads: usize,
    pub head_dim: usize,
}

impl<B: Backend> SelfAttention<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, frames, hidden] = x.dims();
        let split_heads = |t: Tensor<B, 3>| t.reshape([batch, frames, self.num_heads, self.head_dim]).swap_dims(1, 2);

        let scale = (self.head_dim as f64).powf(-0.5);
        let q = split_heads(self.q_proj.forward(x.clone()).mul_scalar(scale));
        let k = split_heads(self.k_proj.forward(x.clone()));
        let v = split_heads(self.v_proj.forward(x));

        let attn = softmax(q.matmul(k.swap_dims(2, 3)), 3);
        let out = attn.matmul(v).swap_dims(1, 2).reshape([batch, frames, hidden]);

        self.out_proj.forward(out)
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub intermediate_dense: Linear<B>,
    pub output_dense: Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.dropout.forward(gelu(self.intermediate_dense.forward(x)));
        self.dropout.forward(self.output_dense.forward(x))
    }
}

/// Post-norm transformer layer, as used by wav2vec2-base.
#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub attention: SelfAttention<B>,
    pub dropout: Dropout,
    pub layer_norm: LayerNorm<B>,
    pub feed_forward: FeedForward<B>,
    pub final_layer_norm: LayerNorm<B>,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let attended = self.dropout.forward(self.attention.forward(x.clone()));
        let x = self.layer_norm.forward(x + attended);
        let fed = self.feed_forward.forward(x.clone());

        self.final_layer_norm.forward(x + fed)
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub feature_projection: FeatureProjection<B>,
    pub pos_conv_embed: PosConvEmbed<B>,
    pub layer_norm: LayerNorm<B>,
    pub layers: Vec<EncoderLayer<B>>,
    pub dropout: Dropout,
}

impl<B: Backend> Encoder<B> {
    /// Returns the output of every encoder layer, first layer first.
    pub fn forward(&self, features: Tensor<B, 3>) -> Vec<Tensor<B, 3>> {
        let x = self.feature_projection.forward(features);
        let x = x.clone() + self.pos_conv_embed.forward(x);
        let mut x = self.dropout.forward(self.layer_norm.forward(x));

        let mut hidden_states = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            x = layer.forward(x);
            hidden_states.push(x.clone());
        }

        hidden_states
    }
}

/// Convert a PyTorch wav2vec2 checkpoint into a [Backbone] record.
///
/// Handles the torchaudio layout (`encoder.transformer.*`) as well as the newer `parametrizations` naming for the
/// weight-normalised positional convolution. Additional `(pattern, replacement)` pairs are applied afterwards.
#[cfg(feature = "import")]
pub fn import_pytorch_backbone<B: Backend>(
    checkpoint: impl Into<std::path::PathBuf>,
    extra_remaps: &[(String, String)],
    config: &BackboneConfig,
    device: &B::Device,
) -> Result<Backbone<B>, burn::record::RecorderError> {
    use burn::record::{FullPrecisionSettings, Recorder};
    use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

    let mut args = LoadArgs::new(checkpoint.into())
        .with_key_remap(r"^encoder\.transformer\.", "encoder.")
        .with_key_remap(r"pos_conv_embed\.conv\.parametrizations\.weight\.original0", "pos_conv_embed.weight_g")
        .with_key_remap(r"pos_conv_embed\.conv\.parametrizations\.weight\.original1", "pos_conv_embed.weight_v")
        .with_key_remap(r"pos_conv_embed\.conv\.", "pos_conv_embed.");
    for (pattern, replacement) in extra_remaps {
        args = args.with_key_remap(pattern, replacement);
    }

    let record: BackboneRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default().load(args, device)?;

    Ok(config.init(device).load_record(record))
}
