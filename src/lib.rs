//! Connection routing and deferred enqueueing in front of a Redis-backed job queue.
//!
//! Queues are requested by `(connection, queue)` name from a [`QueueFactory`], which resolves
//! connections through a [`ConnectionRegistry`] built once from configuration. Enqueue calls
//! either go straight to storage, or are buffered in a [`UnitOfWork`] and released together
//! once that unit of work completes successfully.
//!
//! [`QueueFactory`]: application::QueueFactory
//! [`ConnectionRegistry`]: application::ConnectionRegistry
//! [`UnitOfWork`]: application::UnitOfWork

pub mod application;
pub mod config;
pub mod handlers;
pub mod models;
pub mod redis_utils;
pub mod storage;
