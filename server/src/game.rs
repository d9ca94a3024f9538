//! Demo world: blocks falling through a playfield
//!
//! The server owns one `Field` and keeps spawning `Block` children at random
//! columns. Blocks fall every tick and are despawned once they leave the
//! field, so a running lobby continuously exercises spawns, transform deltas
//! and child removal.

use crate::server::Server;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::classes::{self, BLOCK_SIZE, FIELD_COLUMNS, FIELD_ROWS};
use shared::scene::SceneError;
use shared::NetworkId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rows per second
pub const FALL_SPEED: f32 = 4.0;
pub const SPAWN_INTERVAL: Duration = Duration::from_millis(500);

pub struct BlockRain {
    field: Option<NetworkId>,
    blocks: VecDeque<NetworkId>,
    max_blocks: usize,
    last_spawn: Option<Instant>,
    spawned: u64,
    rng: StdRng,
}

impl BlockRain {
    pub fn new(max_blocks: usize) -> Self {
        Self::with_rng(max_blocks, StdRng::from_entropy())
    }

    pub fn with_seed(max_blocks: usize, seed: u64) -> Self {
        Self::with_rng(max_blocks, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_blocks: usize, rng: StdRng) -> Self {
        Self {
            field: None,
            blocks: VecDeque::new(),
            max_blocks,
            last_spawn: None,
            spawned: 0,
            rng,
        }
    }

    pub fn field(&self) -> Option<NetworkId> {
        self.field
    }

    pub fn blocks(&self) -> impl Iterator<Item = &NetworkId> {
        self.blocks.iter()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn setup(&mut self, server: &mut Server, now: Instant) -> Result<NetworkId, SceneError> {
        let field = server.spawn(classes::field("field"), now)?;
        self.field = Some(field);
        info!("Block field {} ready", field);
        Ok(field)
    }

    /// Advances the world by `dt` seconds
    pub fn update(&mut self, server: &mut Server, now: Instant, dt: f32) -> Result<(), SceneError> {
        let Some(field) = self.field else {
            return Ok(());
        };

        let floor = FIELD_ROWS as f32 * BLOCK_SIZE;
        let mut landed = Vec::new();
        for block in &self.blocks {
            let Some(transform) = server.object_mut(*block).and_then(|o| o.transform_mut()) else {
                continue;
            };
            transform.position[1] += FALL_SPEED * BLOCK_SIZE * dt;
            if transform.position[1] >= floor {
                landed.push(*block);
            }
        }

        for block in landed {
            self.blocks.retain(|id| *id != block);
            server.despawn_child(field, block)?;
            debug!("Block {} left the field", block);
        }

        let spawn_due = self
            .last_spawn
            .map_or(true, |last| now.saturating_duration_since(last) >= SPAWN_INTERVAL);
        if spawn_due && self.blocks.len() < self.max_blocks {
            self.spawn_block(server, field, now)?;
        }
        Ok(())
    }

    fn spawn_block(
        &mut self,
        server: &mut Server,
        field: NetworkId,
        now: Instant,
    ) -> Result<NetworkId, SceneError> {
        let column = self.rng.gen_range(0..FIELD_COLUMNS);
        self.spawned += 1;

        let mut block = classes::block(&format!("block{}", self.spawned));
        if let Some(transform) = block.transform_mut() {
            transform.position = [column as f32 * BLOCK_SIZE, 0.0, 0.0];
        }
        let id = server.spawn_child(field, block, now)?;
        self.blocks.push_back(id);
        self.last_spawn = Some(now);
        Ok(id)
    }
}
