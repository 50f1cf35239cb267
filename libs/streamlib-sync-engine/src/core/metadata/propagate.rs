// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Moving metadata across a processing step
//!
//! A step consumes `consumed` samples from its input and produces `produced`
//! samples on its output. Nodes inside the consumed span move to the output
//! with their offset rescaled into the produced span. Nodes pushed past the
//! span by algorithmic delay wait in an internal ledger until the delayed
//! samples come out. Everything else stays on the input, re-based by what
//! was consumed.

use super::{MetadataList, MetadataNode};
use crate::core::stream::StreamFlags;

/// Anything that owns a ledger plus the flags describing it.
pub trait MetadataCarrier {
    fn ledger(&mut self) -> (&mut MetadataList, &mut StreamFlags);
}

/// Sample counts (per channel) for one processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropagationSpan {
    pub consumed: usize,
    pub produced: usize,
    /// Samples already in the output before this step wrote to it.
    pub out_initial: usize,
    /// False when the input carried metadata but no samples.
    pub input_has_data: bool,
}

impl PropagationSpan {
    /// Straight copy: what went in comes out, appended after `out_initial`.
    pub fn passthrough(samples: usize, out_initial: usize) -> Self {
        Self {
            consumed: samples,
            produced: samples,
            out_initial,
            input_has_data: samples > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropagationResult {
    pub moved_to_output: usize,
    pub moved_to_internal: usize,
    pub eos_reached_output: bool,
}

/// Run one propagation step.
///
/// The internal ledger is drained first since its nodes are older than
/// anything still attached to the input. The output's `marker_eos` is only
/// raised when an end-of-stream node actually lands there, and the input's
/// marker is only kept while the input still holds one.
pub fn propagate(
    input: Option<&mut dyn MetadataCarrier>,
    output: &mut dyn MetadataCarrier,
    mut internal: Option<&mut MetadataList>,
    algorithmic_delay: usize,
    span: PropagationSpan,
) -> PropagationResult {
    let (out_list, out_flags) = output.ledger();
    let mut result = PropagationResult::default();

    if let Some(internal) = internal.as_deref_mut() {
        let mut pending = MetadataList::new();
        while let Some(mut node) = internal.pop_front() {
            if node.offset <= span.consumed {
                rescale_into_output(&mut node, &span);
                result.eos_reached_output |= node.is_eos();
                result.moved_to_output += 1;
                out_list.push(node);
            } else {
                node.rebase_down(span.consumed);
                pending.push(node);
            }
        }
        pending.move_all(internal);
    }

    if let Some(input) = input {
        let (in_list, in_flags) = input.ledger();
        let mut remaining = MetadataList::new();

        while let Some(mut node) = in_list.pop_front() {
            let in_span = if span.input_has_data {
                span.consumed != 0 && node.offset <= span.consumed
            } else {
                node.offset == 0
            };

            if !in_span {
                node.rebase_down(span.consumed);
                remaining.push(node);
                continue;
            }

            if !node.flags.is_buffer_associated() {
                node.offset += algorithmic_delay;
            }

            if node.offset <= span.consumed {
                rescale_into_output(&mut node, &span);
                result.eos_reached_output |= node.is_eos();
                result.moved_to_output += 1;
                out_list.push(node);
                continue;
            }

            node.rebase_down(span.consumed);
            match internal.as_deref_mut() {
                Some(internal) => {
                    result.moved_to_internal += 1;
                    internal.push(node);
                }
                None => {
                    tracing::warn!(
                        "[propagate] {:?} delayed past output with no internal ledger, placing at end",
                        node.id()
                    );
                    node.offset = span.out_initial + span.produced;
                    result.eos_reached_output |= node.is_eos();
                    result.moved_to_output += 1;
                    out_list.push(node);
                }
            }
        }

        remaining.move_all(in_list);
        if in_flags.marker_eos {
            in_flags.marker_eos = in_list.has_eos();
        }
    }

    if result.eos_reached_output {
        out_flags.marker_eos = true;
    }
    result
}

fn rescale_into_output(node: &mut MetadataNode, span: &PropagationSpan) {
    let scaled = if span.consumed == 0 {
        if node.flags.begin_associated {
            0
        } else {
            span.produced
        }
    } else {
        (node.offset * span.produced)
            .div_ceil(span.consumed)
            .min(span.produced)
    };
    node.offset = scaled + span.out_initial;
}
