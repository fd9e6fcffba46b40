//! Classroom simulator
//!
//! Spawns full sessions (teacher and students) against one in-process relay,
//! each with its own virtual scene and telemetry sink.

use std::sync::Arc;
use std::time::Duration;

use cohort_core::{CohortResult, ConnectionId, Role, RoomId, Vec3};
use cohort_runtime::{Session, SessionConfig, SessionEvent, SessionHandle, SessionParts};
use cohort_transport::MemoryRelay;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

use crate::{chaotic, ChaosConfig, ChaosMonitor, MemorySink, VirtualScene};

/// One simulated client
pub struct Member {
    pub handle: SessionHandle,
    pub scene: VirtualScene,
    pub sink: Arc<MemorySink>,
    pub chaos: Option<ChaosMonitor>,
    events: broadcast::Receiver<SessionEvent>,
}

impl Member {
    /// Wait for the first event matching `predicate`
    pub async fn wait_for<F>(&mut self, limit: Duration, mut predicate: F) -> Option<SessionEvent>
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.events.recv()).await {
                Ok(Ok(event)) if predicate(&event) => return Some(event),
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
            }
        }
    }
}

/// Classroom configuration
pub struct ClassroomBuilder {
    config: SessionConfig,
    students: usize,
    teacher: bool,
    chaos: Option<(ChaosConfig, u64)>,
}

impl ClassroomBuilder {
    pub fn new() -> Self {
        ClassroomBuilder {
            config: SessionConfig {
                room: "workshop".to_string(),
                ..SessionConfig::default()
            },
            students: 0,
            teacher: false,
            chaos: None,
        }
    }

    /// Base configuration for every member; name and role are filled in
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_students(mut self, count: usize) -> Self {
        self.students = count;
        self
    }

    pub fn with_teacher(mut self) -> Self {
        self.teacher = true;
        self
    }

    /// Impair every member's outbound link, seeded per member
    pub fn with_chaos(mut self, config: ChaosConfig, seed: u64) -> Self {
        self.chaos = Some((config, seed));
        self
    }

    /// Spawn every session; must run inside a tokio runtime
    pub fn build(self) -> CohortResult<Classroom> {
        let mut classroom = Classroom {
            relay: MemoryRelay::new(),
            room: RoomId::new(self.config.room.clone()),
            config: self.config,
            chaos: self.chaos,
            teacher: None,
            students: Vec::new(),
        };

        if self.teacher {
            let member = classroom.spawn_member("Teacher", Role::Teacher, Vec3::new(0.0, 1.6, 0.0))?;
            classroom.teacher = Some(member);
        }
        for i in 0..self.students {
            let position = Vec3::new(i as f32, 1.6, 3.0);
            let member = classroom.spawn_member(&format!("Student {}", i + 1), Role::Student, position)?;
            classroom.students.push(member);
        }
        Ok(classroom)
    }
}

impl Default for ClassroomBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Running classroom
pub struct Classroom {
    relay: MemoryRelay,
    room: RoomId,
    config: SessionConfig,
    chaos: Option<(ChaosConfig, u64)>,
    teacher: Option<Member>,
    students: Vec<Member>,
}

impl Classroom {
    fn spawn_member(&mut self, name: &str, role: Role, position: Vec3) -> CohortResult<Member> {
        let config = SessionConfig {
            display_name: name.to_string(),
            role,
            ..self.config.clone()
        };
        let scene = VirtualScene::standing_at(position);
        let sink = MemorySink::new();

        let (handle, inbound) = self.relay.connect();
        let (handle, chaos) = match &mut self.chaos {
            Some((chaos, seed)) => {
                *seed += 1;
                let (handle, monitor) = chaotic(handle, chaos.clone(), *seed);
                (handle, Some(monitor))
            }
            None => (handle, None),
        };

        let parts = SessionParts::new(Box::new(scene.clone())).with_telemetry(sink.clone());
        let session = Session::spawn(config, (handle, inbound), parts)?;
        let events = session.events();
        Ok(Member {
            handle: session,
            scene,
            sink,
            chaos,
            events,
        })
    }

    /// Add a latecomer
    pub fn join(&mut self, name: &str, role: Role) -> CohortResult<usize> {
        let position = Vec3::new(self.students.len() as f32, 1.6, 3.0);
        let member = self.spawn_member(name, role, position)?;
        self.students.push(member);
        Ok(self.students.len() - 1)
    }

    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn teacher(&mut self) -> Option<&mut Member> {
        self.teacher.as_mut()
    }

    pub fn student(&mut self, index: usize) -> Option<&mut Member> {
        self.students.get_mut(index)
    }

    pub fn students(&self) -> &[Member] {
        &self.students
    }

    pub fn members(&self) -> usize {
        self.students.len() + usize::from(self.teacher.is_some())
    }

    /// Wait until every member has joined the room
    pub async fn seated(&self, limit: Duration) -> bool {
        let expected = self.members();
        timeout(limit, async {
            while self.relay.room_size(&self.room) < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Remove a student without the leave handshake
    pub fn drop_student(&mut self, index: usize) -> Option<ConnectionId> {
        if index >= self.students.len() {
            return None;
        }
        let member = self.students.remove(index);
        Some(member.handle.connection_id())
    }

    /// Shut every session down in join order
    pub async fn shutdown(self) {
        if let Some(teacher) = &self.teacher {
            teacher.handle.shutdown().await;
        }
        for student in &self.students {
            student.handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_classroom_seats_everyone() {
        let classroom = ClassroomBuilder::new()
            .with_teacher()
            .with_students(3)
            .build()
            .unwrap();
        assert_eq!(classroom.members(), 4);
        assert!(classroom.seated(Duration::from_secs(5)).await);
        classroom.shutdown().await;
    }

    #[tokio::test]
    async fn test_latecomer_joins() {
        let mut classroom = ClassroomBuilder::new().with_students(1).build().unwrap();
        assert!(classroom.seated(Duration::from_secs(5)).await);
        classroom.join("Late", Role::Guest).unwrap();
        assert!(classroom.seated(Duration::from_secs(5)).await);
        assert_eq!(classroom.relay().room_size(classroom.room()), 2);
        classroom.shutdown().await;
    }
}
