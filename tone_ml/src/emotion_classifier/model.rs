use crate::emotion_classifier::backbone::{Backbone, BackboneConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Config, Int, Module, Tensor};
use burn::tensor::activation::softmax;
use burn::train::ClassificationOutput;

#[derive(Config, Debug)]
pub struct EmotionModelConfig {
    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,
    pub num_classes: usize,
    /// Amount of final encoder layers whose outputs are concatenated before pooling.
    #[config(default = 4)]
    pub pooled_layers: usize,
    #[config(default = "vec![512, 256, 128]")]
    pub hidden_sizes: Vec<usize>,
    #[config(default = "vec![0.4, 0.3, 0.2]")]
    pub dropouts: Vec<f64>,
    /// Amount of leading head blocks which apply batch normalisation.
    #[config(default = 2)]
    pub batch_norm_blocks: usize,
    /// Amount of leading encoder layers which are excluded from fine-tuning.
    #[config(default = 8)]
    pub frozen_layers: usize,
}

impl EmotionModelConfig {
    pub fn pooled_width(&self) -> usize {
        self.backbone.hidden_size * self.pooled_layers
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> EmotionModel<B> {
        self.init_with_backbone(self.backbone.init(device), device)
    }

    /// Build the model around an existing (usually pretrained) backbone.
    pub fn init_with_backbone<B: Backend>(&self, backbone: Backbone<B>, device: &B::Device) -> EmotionModel<B> {
        let width = self.pooled_width();

        let mut blocks = Vec::with_capacity(self.hidden_sizes.len());
        let mut d_input = width;
        for (i, &d_output) in self.hidden_sizes.iter().enumerate() {
            blocks.push(HeadBlock {
                linear: LinearConfig::new(d_input, d_output).init(device),
                norm: (i < self.batch_norm_blocks).then(|| BatchNormConfig::new(d_output).init(device)),
                activation: Relu::new(),
                dropout: DropoutConfig::new(self.dropouts.get(i).copied().unwrap_or_default()).init(),
            });
            d_input = d_output;
        }

        EmotionModel {
            backbone,
            pooling: AttentionPooling {
                score: LinearConfig::new(width, 1).init(device),
            },
            head: ClassificationHead {
                blocks,
                output: LinearConfig::new(d_input, self.num_classes).init(device),
            },
            pooled_layers: self.pooled_layers,
        }
    }
}

/// Weighted average over time, with weights learned from the frames themselves.
#[derive(Module, Debug)]
pub struct AttentionPooling<B: Backend> {
    pub score: Linear<B>,
}

impl<B: Backend> AttentionPooling<B> {
    /// # Shapes
    ///   - Input [batch_size, frames, width]
    ///   - Output [batch_size, width]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let weights = softmax(self.score.forward(x.clone()), 1);

        (x * weights).sum_dim(1).squeeze::<2>(1)
    }
}

#[derive(Module, Debug)]
pub struct HeadBlock<B: Backend> {
    pub linear: Linear<B>,
    pub norm: Option<BatchNorm<B, 1>>,
    pub activation: Relu,
    pub dropout: Dropout,
}

impl<B: Backend> HeadBlock<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = match &self.norm {
            // BatchNorm expects a trailing spatial dimension.
            Some(norm) => norm.forward(x.unsqueeze_dim::<3>(2)).squeeze::<2>(2),
            None => x,
        };

        self.dropout.forward(self.activation.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    pub blocks: Vec<HeadBlock<B>>,
    pub output: Linear<B>,
}

impl<B: Backend> ClassificationHead<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        self.output.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct EmotionModel<B: Backend> {
    pub backbone: Backbone<B>,
    pub pooling: AttentionPooling<B>,
    pub head: ClassificationHead<B>,
    pub pooled_layers: usize,
}

impl<B: Backend> EmotionModel<B> {
    /// # Shapes
    ///   - Waveform [batch_size, samples]
    ///   - Output logits [batch_size, num_classes]
    pub fn forward(&self, waveform: Tensor<B, 2>) -> Tensor<B, 2> {
        let hidden_states = self.backbone.forward(waveform);
        let skip = hidden_states.len().saturating_sub(self.pooled_layers);
        let pooled_input = Tensor::cat(hidden_states.into_iter().skip(skip).collect(), 2);

        self.head.forward(self.pooling.forward(pooled_input))
    }

    pub fn forward_classification(&self, waveform: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B> {
        let output = self.forward(waveform);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// Exclude the first `n` transformer layers from fine-tuning.
    ///
    /// The convolutional feature extractor, projection and positional embedding stay trainable.
    pub fn freeze_backbone_prefix(mut self, n: usize) -> Self {
        self.backbone = self.backbone.freeze_layers(n);
        self
    }

    /// Width of the final classification layer.
    pub fn num_classes(&self) -> usize {
        self.head.output.weight.dims()[1]
    }
}
