//! Messages and server stub generated from `proto/auth.proto`.

#![allow(clippy::all, missing_docs)]

tonic::include_proto!("flyteidl.service");
