// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Maximum number of hardware job slots.
pub const MAX_JOB_SLOTS: usize = 16;

/// Maximum number of hardware address spaces. The submission-allowed bitmap is a `u16`, so this cannot grow past 16.
pub const MAX_ADDRESS_SPACES: usize = 16;

/// Number of atoms a job slot holds in flight: one in the HEAD registers and one in the NEXT registers.
pub const JOB_SLOT_DEPTH: usize = 2;

/// Maximum number of atoms submitted on a single slot by a single interrupt.
/// This stops the interrupt handler from looping over GPU NULL jobs that complete while it is still running.
pub const MAX_SUBMIT_PER_SLOT_PER_IRQ: u8 = 2;
