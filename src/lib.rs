// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cache;
pub mod cfg;
pub mod http;
pub mod pool;
pub mod proxy;
