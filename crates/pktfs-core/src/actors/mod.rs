// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Background helper actors shared by every filesystem handle in a context

pub mod mount_list;
pub mod orphans;

pub use mount_list::{ListEdit, MountList, MountListActor, MountListHandle, MountRecord, RecordKind};
pub use orphans::{OrphanCollector, OrphanHandle, OrphanVolume};
