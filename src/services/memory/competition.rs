use async_trait::async_trait;

use super::{now, LogRecord, MemoryBackend, MemoryState};
use crate::database::Transaction;
use crate::middleware::pagination::{paginate, PaginationRequest, PaginationResult};
use crate::services::competition::{
    CompetitionService, LeaderboardEntry, LogFile, LogSubmission, Participant, Registration, RegistrationStatus,
    SubmissionStatus, SubmissionUpdate,
};
use crate::services::users::User;
use crate::services::{ServiceError, ServiceResult};

impl MemoryState {
    fn registration_index(&self, competition: &str, participant: &str) -> Option<usize> {
        self.registrations.iter().position(|r| {
            r.competition == competition
                && r.participant.eq_ignore_ascii_case(participant)
                && r.status != RegistrationStatus::Rejected
        })
    }

    fn participant_index(&self, competition: &str, owner: &str) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.competition == competition && p.owner.eq_ignore_ascii_case(owner))
    }

    fn log_index(&self, competition: &str, id: i64) -> ServiceResult<usize> {
        self.logs
            .iter()
            .position(|l| l.log.id == id && l.log.competition == competition)
            .ok_or_else(|| ServiceError::not_found(format!("Log file [{}] not found", id)))
    }
}

impl MemoryBackend {
    /// System admins and owners/admins of the organizing organization
    fn is_competition_admin(&self, state: &MemoryState, competition: &str, user: &User) -> bool {
        state.is_org_admin(competition, user) || state.is_org_admin(&self.competition_admins, user)
    }

    /// Members of the organizing organization can see every participant's data
    fn is_competition_member(&self, state: &MemoryState, competition: &str, user: &User) -> bool {
        self.is_competition_admin(state, competition, user)
            || state.role_in(competition, &user.username).is_some()
            || state.role_in(&self.competition_admins, &user.username).is_some()
    }

    fn log_path(&self, competition: &str, id: i64, file_name: &str) -> std::path::PathBuf {
        self.resource_root
            .join("competition-logs")
            .join(competition)
            .join(id.to_string())
            .join(file_name)
    }
}

#[async_trait]
impl CompetitionService for MemoryBackend {
    async fn leaderboard(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        circuit: Option<&str>,
        owner: Option<&str>,
    ) -> ServiceResult<(Vec<LeaderboardEntry>, PaginationResult)> {
        let state = self.state.read().await;
        let mut entries: Vec<LeaderboardEntry> = Vec::new();
        for participant in state.participants.iter().filter(|p| p.competition == competition) {
            if owner.map(|o| !participant.owner.eq_ignore_ascii_case(o)).unwrap_or(false) {
                continue;
            }
            // best score per circuit
            let mut best: Vec<LeaderboardEntry> = Vec::new();
            for score in state
                .scores
                .iter()
                .filter(|s| s.competition == competition && s.owner.eq_ignore_ascii_case(&participant.owner))
            {
                match best.iter_mut().find(|b| b.circuit == score.circuit) {
                    Some(b) if b.score < score.score => b.score = score.score,
                    Some(_) => {}
                    None => best.push(score.clone()),
                }
            }
            if best.is_empty() {
                best.push(LeaderboardEntry {
                    owner: participant.owner.clone(),
                    competition: competition.to_string(),
                    circuit: None,
                    score: None,
                });
            }
            entries.extend(best);
        }

        if let Some(circuit) = circuit {
            entries.retain(|e| {
                e.circuit
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case(circuit))
                    .unwrap_or(false)
            });
        }
        entries.sort_by(|a, b| {
            b.score
                .unwrap_or(f32::MIN)
                .partial_cmp(&a.score.unwrap_or(f32::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(paginate(entries, page))
    }

    async fn registrations(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        status: RegistrationStatus,
        user: &User,
    ) -> ServiceResult<(Vec<Registration>, PaginationResult)> {
        let state = self.state.read().await;
        let admin = self.is_competition_admin(&state, competition, user);
        let found: Vec<Registration> = state
            .registrations
            .iter()
            .filter(|r| r.competition == competition && r.status == status)
            .filter(|r| admin || r.creator.eq_ignore_ascii_case(&user.username))
            .cloned()
            .collect();
        Ok(paginate(found, page))
    }

    async fn apply(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        user: &User,
    ) -> ServiceResult<Registration> {
        let mut state = self.write(tx).await;
        if participant.eq_ignore_ascii_case(competition) {
            return Err(ServiceError::Invalid("participant".to_string()));
        }
        let org = state
            .org(participant)
            .map(|o| o.org.name.clone())
            .ok_or_else(|| ServiceError::not_found(format!("Organization [{}] not found", participant)))?;
        if !state.can_write_owner(Some(user), &org) {
            return Err(ServiceError::forbidden(format!("Not authorized to register {}", org)));
        }
        let pending_by_user = state.registrations.iter().any(|r| {
            r.competition == competition
                && r.creator.eq_ignore_ascii_case(&user.username)
                && r.status != RegistrationStatus::Rejected
        });
        if pending_by_user || state.registration_index(competition, &org).is_some() {
            return Err(ServiceError::AlreadyExists(format!("Registration for {} already exists", org)));
        }

        let registration = Registration {
            competition: competition.to_string(),
            participant: org,
            creator: user.username.clone(),
            status: RegistrationStatus::Pending,
            created_at: now(),
            resolved_at: None,
        };
        state.registrations.push(registration.clone());
        tracing::info!(
            "new registration for {} from {} by {}",
            competition,
            registration.participant,
            user.username
        );
        Ok(registration)
    }

    async fn resolve(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        resolution: RegistrationStatus,
        user: &User,
    ) -> ServiceResult<Registration> {
        let mut state = self.write(tx).await;
        if resolution == RegistrationStatus::Pending {
            return Err(ServiceError::Invalid("resolution".to_string()));
        }
        let idx = state
            .registration_index(competition, participant)
            .filter(|&i| state.registrations[i].status == RegistrationStatus::Pending)
            .ok_or_else(|| ServiceError::not_found(format!("Registration for {} not found", participant)))?;
        if !self.is_competition_admin(&state, competition, user) {
            return Err(ServiceError::forbidden("Only competition admins can resolve registrations"));
        }

        let stamp = now();
        let registration = &mut state.registrations[idx];
        registration.status = resolution;
        registration.resolved_at = Some(stamp);
        let registration = registration.clone();

        if resolution == RegistrationStatus::Done {
            state.participants.push(Participant {
                competition: competition.to_string(),
                owner: registration.participant.clone(),
                created_at: stamp,
            });
        }
        Ok(registration)
    }

    async fn delete_registration(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        user: &User,
    ) -> ServiceResult<Registration> {
        let mut state = self.write(tx).await;
        let idx = state
            .registration_index(competition, participant)
            .filter(|&i| state.registrations[i].status == RegistrationStatus::Pending)
            .ok_or_else(|| ServiceError::not_found(format!("Registration for {} not found", participant)))?;
        let creator = state.registrations[idx].creator.eq_ignore_ascii_case(&user.username);
        if !creator && !self.is_competition_admin(&state, competition, user) {
            return Err(ServiceError::forbidden("Not authorized to cancel this registration"));
        }
        Ok(state.registrations.remove(idx))
    }

    async fn participants(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        user: &User,
    ) -> ServiceResult<(Vec<Participant>, PaginationResult)> {
        let state = self.state.read().await;
        let member = self.is_competition_member(&state, competition, user);
        let found: Vec<Participant> = state
            .participants
            .iter()
            .filter(|p| p.competition == competition)
            .filter(|p| member || state.can_read_owner(Some(user), &p.owner))
            .cloned()
            .collect();
        Ok(paginate(found, page))
    }

    async fn delete_participant(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        participant: &str,
        user: &User,
    ) -> ServiceResult<Participant> {
        let mut state = self.write(tx).await;
        let idx = state
            .participant_index(competition, participant)
            .ok_or_else(|| ServiceError::not_found(format!("Participant [{}] not found", participant)))?;
        let reg = state
            .registration_index(competition, participant)
            .ok_or_else(|| ServiceError::not_found(format!("Registration for {} not found", participant)))?;
        let own = state.participants[idx].owner.eq_ignore_ascii_case(&user.username);
        if !own && !self.is_competition_admin(&state, competition, user) {
            return Err(ServiceError::forbidden("Not authorized to remove this participant"));
        }
        state.registrations.remove(reg);
        Ok(state.participants.remove(idx))
    }

    async fn create_log(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        submission: &LogSubmission,
        file_name: &str,
        contents: &[u8],
        user: &User,
    ) -> ServiceResult<LogFile> {
        if let Some(owner) = submission.owner.as_deref().filter(|o| !o.is_empty()) {
            self.sync_user(owner).await?;
        }
        let mut state = self.write(tx).await;
        let owner = match submission.owner.as_deref().filter(|o| !o.is_empty()) {
            None => user.username.clone(),
            Some(o) => {
                let owner = state
                    .owner_name(o)
                    .ok_or_else(|| ServiceError::not_found(format!("Owner [{}] not found", o)))?;
                if !state.can_read_owner(Some(user), &owner) {
                    return Err(ServiceError::forbidden(format!("Not a member of {}", owner)));
                }
                owner
            }
        };
        if state.participant_index(competition, &owner).is_none() {
            return Err(ServiceError::not_found(format!("Participant [{}] not found", owner)));
        }

        let id = state.next_id();
        let path = self.log_path(competition, id, file_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;

        let log = LogFile {
            id,
            competition: competition.to_string(),
            owner: owner.clone(),
            creator: user.username.clone(),
            file_name: file_name.to_string(),
            description: submission.description.clone(),
            private: submission.private.unwrap_or(true),
            status: SubmissionStatus::ForReview,
            score: None,
            comments: None,
            created_at: now(),
            resolved_at: None,
        };
        state.logs.push(LogRecord { log: log.clone(), path });
        tracing::info!("log file {} submitted for {} by {}", id, owner, user.username);
        Ok(log)
    }

    async fn update_log(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        id: i64,
        update: &SubmissionUpdate,
        user: &User,
    ) -> ServiceResult<LogFile> {
        let mut state = self.write(tx).await;
        if !self.is_competition_admin(&state, competition, user) {
            return Err(ServiceError::forbidden("Only competition admins can review log files"));
        }
        let idx = state.log_index(competition, id)?;
        let log = &mut state.logs[idx].log;
        log.status = update.status;
        log.score = Some(update.score);
        log.resolved_at = Some(now());
        if let Some(comments) = &update.comments {
            log.comments = Some(comments.clone());
        }
        let log = log.clone();

        if log.status == SubmissionStatus::Done {
            state.scores.push(LeaderboardEntry {
                owner: log.owner.clone(),
                competition: competition.to_string(),
                circuit: None,
                score: log.score,
            });
        }
        Ok(log)
    }

    async fn remove_log(&self, tx: &mut dyn Transaction, competition: &str, id: i64, user: &User) -> ServiceResult<LogFile> {
        let mut state = self.write(tx).await;
        if !user.is_admin {
            return Err(ServiceError::forbidden("Only system admins can remove log files"));
        }
        let idx = state.log_index(competition, id)?;
        let record = state.logs.remove(idx);
        if let Err(e) = tokio::fs::remove_file(&record.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                state.logs.insert(idx, record);
                return Err(e.into());
            }
        }
        Ok(record.log)
    }

    async fn get_log(&self, _tx: &mut dyn Transaction, competition: &str, id: i64, user: &User) -> ServiceResult<LogFile> {
        let state = self.state.read().await;
        let idx = state.log_index(competition, id)?;
        let log = &state.logs[idx].log;
        if !self.is_competition_member(&state, competition, user) && !state.can_read_owner(Some(user), &log.owner) {
            return Err(ServiceError::forbidden("Not authorized to access this log file"));
        }
        Ok(log.clone())
    }

    async fn log_download_url(
        &self,
        tx: &mut dyn Transaction,
        competition: &str,
        id: i64,
        user: &User,
    ) -> ServiceResult<String> {
        let log = self.get_log(tx, competition, id, user).await?;
        Ok(format!(
            "{}/{}/logfiles/{}/{}",
            self.download_base_url, competition, log.id, log.file_name
        ))
    }

    async fn logs(
        &self,
        _tx: &mut dyn Transaction,
        page: &PaginationRequest,
        competition: &str,
        owner: Option<&str>,
        status: SubmissionStatus,
        user: &User,
    ) -> ServiceResult<(Vec<LogFile>, PaginationResult)> {
        let state = self.state.read().await;
        let member = self.is_competition_member(&state, competition, user);
        if let Some(owner) = owner {
            if !member && !state.can_read_owner(Some(user), owner) {
                return Err(ServiceError::forbidden(format!("Not a member of {}", owner)));
            }
        }
        let mut found: Vec<LogFile> = state
            .logs
            .iter()
            .map(|r| &r.log)
            .filter(|l| l.competition == competition && l.status == status)
            .filter(|l| owner.map(|o| l.owner.eq_ignore_ascii_case(o)).unwrap_or(true))
            .filter(|l| member || state.can_read_owner(Some(user), &l.owner))
            .cloned()
            .collect();
        found.sort_by_key(|l| std::cmp::Reverse(l.id));
        Ok(paginate(found, page))
    }
}
