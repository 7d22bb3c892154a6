// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Building blocks shared by the scan controller.
pub mod adapter_state;
pub mod broadcaster;
pub mod registry;
