//! The variants benchmarked for every shape, in registration order.

use candle_core::Tensor;

use attention::AttentionError;

use crate::config::BenchConfig;
use crate::invoke::{InputLayout, KernelVariant};
use crate::HarnessError;

/// Tag of the ground-truth variant.
pub const REFERENCE_TAG: &str = "(flash)";
pub const UNFUSED_TAG: &str = "torch(unfused)";
pub const SDPA_TAG: &str = "(sdpa)";

type StagedKernel = fn(&Tensor, &Tensor, &Tensor, &Tensor, usize) -> Result<(), AttentionError>;

pub struct Registry {
    variants: Vec<KernelVariant>,
    reference: usize,
}

impl Registry {
    /// Wrap an explicit variant list. `reference_tag` must name one of them.
    pub fn new(variants: Vec<KernelVariant>, reference_tag: &str) -> Result<Self, HarnessError> {
        let reference = variants
            .iter()
            .position(|variant| variant.tag() == reference_tag)
            .ok_or_else(|| {
                HarnessError::Validation(vec![format!(
                    "reference variant `{reference_tag}` is not registered"
                )])
            })?;
        Ok(Self {
            variants,
            reference,
        })
    }

    /// The default lineup. The unfused and sdpa baselines are opt-in.
    pub fn from_config(config: &BenchConfig) -> Self {
        let mut variants = Vec::new();
        if config.run_unfused {
            variants.push(KernelVariant::functional(
                UNFUSED_TAG,
                InputLayout::HeadsMajor,
                |q, k, v| Ok(attention::unfused_attention(q, k, v)?),
            ));
        }
        for stages in [1, 2] {
            variants.push(staged("split-kv", attention::split_kv, stages));
        }
        for stages in [1, 2] {
            variants.push(staged("split-q", attention::split_q, stages));
        }
        variants.push(KernelVariant::staged_with_aux(
            "split-q+lse+stage1",
            InputLayout::HeadsMajorKeyTransposed,
            1,
            |q, tk, v, out, lse, stages| Ok(attention::split_q_lse(q, tk, v, out, lse, stages)?),
        ));

        let reference = variants.len();
        variants.push(KernelVariant::functional(
            REFERENCE_TAG,
            InputLayout::SeqMajor,
            |q, k, v| Ok(attention::seq_major_attention(q, k, v)?),
        ));

        if config.run_sdpa {
            variants.push(KernelVariant::functional(
                SDPA_TAG,
                InputLayout::HeadsMajor,
                |q, k, v| Ok(attention::exact_attention(q, k, v)?),
            ));
        }

        Self {
            variants,
            reference,
        }
    }

    pub fn variants(&self) -> &[KernelVariant] {
        &self.variants
    }

    pub fn reference(&self) -> &KernelVariant {
        &self.variants[self.reference]
    }

    pub fn reference_index(&self) -> usize {
        self.reference
    }

    /// Buffered variants are certified against the reference; functional
    /// baselines are only timed.
    pub fn is_certified(&self, index: usize) -> bool {
        index != self.reference
            && self
                .variants
                .get(index)
                .is_some_and(|variant| variant.kernel().uses_output_buffer())
    }
}

fn staged(family: &str, func: StagedKernel, stages: usize) -> KernelVariant {
    KernelVariant::staged(
        format!("{family}+stage{stages}"),
        InputLayout::HeadsMajorKeyTransposed,
        stages,
        move |q, tk, v, out, stages| Ok(func(q, tk, v, out, stages)?),
    )
}
