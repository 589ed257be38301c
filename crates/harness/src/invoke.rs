//! Uniform invocation over the four kernel calling conventions.
//!
//! A [`KernelVariant`] pairs an opaque callable with the calling convention it
//! was registered under and the input layout it consumes. The runner only ever
//! calls [`KernelVariant::invoke`]; routing the right subset of the
//! [`TensorSet`] is the adapter's whole job.

use std::fmt;

use candle_core::Tensor;

use crate::shape::AxisConvention;
use crate::tensors::TensorSet;

type FunctionalFn = dyn Fn(&Tensor, &Tensor, &Tensor) -> anyhow::Result<Tensor>;
type BufferedFn = dyn Fn(&Tensor, &Tensor, &Tensor, &Tensor) -> anyhow::Result<()>;
type StagedFn = dyn Fn(&Tensor, &Tensor, &Tensor, &Tensor, usize) -> anyhow::Result<()>;
type StagedAuxFn = dyn Fn(&Tensor, &Tensor, &Tensor, &Tensor, &Tensor, usize) -> anyhow::Result<()>;

/// A callable tagged with its calling convention.
pub enum Kernel {
    /// `f(q, k, v) -> out`.
    Functional(Box<FunctionalFn>),
    /// `f(q, k, v, out)`; writes `out` in place.
    Buffered(Box<BufferedFn>),
    /// `f(q, k, v, out, stages)`.
    Staged { func: Box<StagedFn>, stages: usize },
    /// `f(q, k, v, out, aux, stages)`.
    StagedWithAux { func: Box<StagedAuxFn>, stages: usize },
}

impl Kernel {
    pub fn uses_output_buffer(&self) -> bool {
        !matches!(self, Kernel::Functional(_))
    }

    pub fn uses_aux_buffer(&self) -> bool {
        matches!(self, Kernel::StagedWithAux { .. })
    }

    pub fn stages(&self) -> Option<usize> {
        match self {
            Kernel::Staged { stages, .. } | Kernel::StagedWithAux { stages, .. } => Some(*stages),
            Kernel::Functional(_) | Kernel::Buffered(_) => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Kernel::Functional(_) => "functional",
            Kernel::Buffered(_) => "buffered",
            Kernel::Staged { .. } => "staged",
            Kernel::StagedWithAux { .. } => "staged+aux",
        }
    }
}

/// Which tensors of a [`TensorSet`] a variant consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `q`, `k`, `v` as generated.
    HeadsMajor,
    /// `q`, `tk`, `v`: the key pre-transposed to `[batch, heads, head_dim, seq_len]`.
    HeadsMajorKeyTransposed,
    /// `fq`, `fk`, `fv` in `[batch, seq_len, heads, head_dim]`.
    SeqMajor,
}

impl InputLayout {
    /// Axis convention of the query (and output) for this layout.
    pub fn convention(self) -> AxisConvention {
        match self {
            InputLayout::HeadsMajor | InputLayout::HeadsMajorKeyTransposed => {
                AxisConvention::HeadsMajor
            }
            InputLayout::SeqMajor => AxisConvention::SeqMajor,
        }
    }

    /// The `(q, k, v)` triple routed to the kernel.
    pub fn select<'a>(self, tensors: &'a TensorSet) -> (&'a Tensor, &'a Tensor, &'a Tensor) {
        match self {
            InputLayout::HeadsMajor => (&tensors.q, &tensors.k, &tensors.v),
            InputLayout::HeadsMajorKeyTransposed => (&tensors.q, &tensors.tk, &tensors.v),
            InputLayout::SeqMajor => (&tensors.fq, &tensors.fk, &tensors.fv),
        }
    }
}

/// A named kernel registered for benchmarking.
pub struct KernelVariant {
    tag: String,
    kernel: Kernel,
    layout: InputLayout,
}

impl KernelVariant {
    pub fn new(tag: impl Into<String>, layout: InputLayout, kernel: Kernel) -> Self {
        Self {
            tag: tag.into(),
            kernel,
            layout,
        }
    }

    pub fn functional<F>(tag: impl Into<String>, layout: InputLayout, func: F) -> Self
    where
        F: Fn(&Tensor, &Tensor, &Tensor) -> anyhow::Result<Tensor> + 'static,
    {
        Self::new(tag, layout, Kernel::Functional(Box::new(func)))
    }

    pub fn buffered<F>(tag: impl Into<String>, layout: InputLayout, func: F) -> Self
    where
        F: Fn(&Tensor, &Tensor, &Tensor, &Tensor) -> anyhow::Result<()> + 'static,
    {
        Self::new(tag, layout, Kernel::Buffered(Box::new(func)))
    }

    pub fn staged<F>(tag: impl Into<String>, layout: InputLayout, stages: usize, func: F) -> Self
    where
        F: Fn(&Tensor, &Tensor, &Tensor, &Tensor, usize) -> anyhow::Result<()> + 'static,
    {
        Self::new(
            tag,
            layout,
            Kernel::Staged {
                func: Box::new(func),
                stages,
            },
        )
    }

    pub fn staged_with_aux<F>(
        tag: impl Into<String>,
        layout: InputLayout,
        stages: usize,
        func: F,
    ) -> Self
    where
        F: Fn(&Tensor, &Tensor, &Tensor, &Tensor, &Tensor, usize) -> anyhow::Result<()> + 'static,
    {
        Self::new(
            tag,
            layout,
            Kernel::StagedWithAux {
                func: Box::new(func),
                stages,
            },
        )
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn convention(&self) -> AxisConvention {
        self.layout.convention()
    }

    /// Call the kernel once. Functional kernels return their output; buffered
    /// kernels return `None` and leave the result in `tensors.out`.
    pub fn invoke(&self, tensors: &TensorSet) -> anyhow::Result<Option<Tensor>> {
        let (q, k, v) = self.layout.select(tensors);
        match &self.kernel {
            Kernel::Functional(func) => func(q, k, v).map(Some),
            Kernel::Buffered(func) => func(q, k, v, &tensors.out).map(|_| None),
            Kernel::Staged { func, stages } => func(q, k, v, &tensors.out, *stages).map(|_| None),
            Kernel::StagedWithAux { func, stages } => {
                func(q, k, v, &tensors.out, &tensors.lse, *stages).map(|_| None)
            }
        }
    }
}

impl fmt::Debug for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelVariant")
            .field("tag", &self.tag)
            .field("kernel", &self.kernel.name())
            .field("stages", &self.kernel.stages())
            .field("layout", &self.layout)
            .finish()
    }
}
