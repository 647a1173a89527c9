// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Caller/user identifier. All job and workflow ownership checks compare
//! against this type (spec.md §3 "Ownership").

crate::define_id! {
    #[derive(Default)]
    pub struct UserId("usr-");
}
