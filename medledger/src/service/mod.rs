//! 監査付き変更サービス
//!
//! アクセス判定 → リソース変更（アウトボックス行と同一トランザクション）→ 台帳追記
//! の順に処理する。各段階は`MutationPhase`としてdebugレベルで記録する。

pub mod types;

pub use types::{Mutation, MutationPhase, Resource};

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::access::{
    self, AccessPolicy, AccessSubject, Decision, DenyReason, DoctorReadPolicy, Entity, Operation,
    Target,
};
use crate::common::error::{MedError, MedResult};
use crate::common::types::{AccessGrant, ActorContext, Appointment, Doctor, MedicalRecord, Role};
use crate::db::access_requests::DEFAULT_ACCESS_MINUTES;
use crate::db::traits::{ClinicStore, Mutated};
use crate::ledger::types::ResourceKind;
use crate::ledger::Ledger;
use crate::lock::resource::ResourceLocks;

/// アクセスログの種別（記録作成）
pub const ACCESS_CREATE_RECORD: &str = "CreateRecord";
/// アクセスログの種別（記録閲覧）
pub const ACCESS_READ_RECORD: &str = "ReadRecord";

/// 監査付き変更サービス
pub struct AuditedMutationService<S: ClinicStore> {
    store: Arc<S>,
    ledger: Arc<Ledger>,
    policy: AccessPolicy,
    locks: ResourceLocks,
}

impl<S: ClinicStore> std::fmt::Debug for AuditedMutationService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditedMutationService")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn trace_phase(op: Operation, actor: &ActorContext, phase: MutationPhase) {
    debug!(
        operation = op.as_str(),
        role = %actor.role,
        user_id = actor.user_id,
        phase = %phase,
        "Mutation phase"
    );
}

fn decision_to_result(decision: Decision) -> MedResult<()> {
    match decision {
        Decision::Allowed => Ok(()),
        Decision::Denied(reason) => Err(MedError::AuthorizationDenied(reason)),
        Decision::NotFound(entity) => Err(MedError::ResourceNotFound(entity)),
    }
}

fn doctor_of(subject: &AccessSubject) -> MedResult<&Doctor> {
    match subject {
        AccessSubject::Doctor(Some(doctor)) => Ok(doctor),
        AccessSubject::Doctor(None) => Err(MedError::ResourceNotFound(Entity::Doctor)),
        AccessSubject::Patient(_) => Err(MedError::AuthorizationDenied(DenyReason::NotADoctor)),
    }
}

impl<S: ClinicStore> AuditedMutationService<S> {
    /// サービスを作成
    pub fn new(store: Arc<S>, ledger: Arc<Ledger>, policy: AccessPolicy) -> Self {
        Self {
            store,
            ledger,
            policy,
            locks: ResourceLocks::new(),
        }
    }

    /// 起動処理：アウトボックスに残った監査エントリを台帳へ追記する
    ///
    /// # Returns
    /// * `Ok(usize)` - 追記したブロック数
    pub async fn start(&self) -> MedResult<usize> {
        let drained = self.ledger.drain_outbox().await?;
        if drained > 0 {
            warn!(drained, "Recovered unaudited mutations from outbox");
        }
        Ok(drained)
    }

    /// 台帳
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// アクセスポリシー
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// このサービスのポリシーでアクセス判定を行う
    pub fn evaluate(
        &self,
        op: Operation,
        subject: &AccessSubject,
        target: &Target<'_>,
    ) -> Decision {
        access::evaluate(op, subject, target, Utc::now(), &self.policy)
    }

    fn authorize(
        &self,
        op: Operation,
        subject: &AccessSubject,
        target: &Target<'_>,
    ) -> MedResult<()> {
        let decision = self.evaluate(op, subject, target);
        if !decision.is_allowed() {
            debug!(operation = op.as_str(), decision = ?decision, "Access not allowed");
        }
        decision_to_result(decision)
    }

    /// アクターのロールに応じてプロファイルを解決する
    pub async fn resolve_subject(&self, actor: &ActorContext) -> MedResult<AccessSubject> {
        match actor.role {
            Role::Doctor => Ok(AccessSubject::Doctor(
                self.store.find_doctor_by_user_id(actor.user_id).await?,
            )),
            Role::Patient => Ok(AccessSubject::Patient(
                self.store.find_patient_by_user_id(actor.user_id).await?,
            )),
        }
    }

    /// 変更要求を処理する
    ///
    /// # Returns
    /// * `Ok(Resource)` - 変更後（削除の場合は削除前）のリソース。台帳に記録済み
    /// * `Err(MedError::AuthorizationDenied | ResourceNotFound)` - 副作用なし
    /// * `Err(MedError::UnauditedMutation)` - 変更済みだが台帳追記は保留中
    pub async fn perform(&self, actor: &ActorContext, mutation: Mutation) -> MedResult<Resource> {
        let op = mutation.operation();
        let kind = mutation.resource_kind();
        trace_phase(op, actor, MutationPhase::Received);

        let result = self.run(op, actor, mutation).await;
        match &result {
            Ok(resource) => {
                trace_phase(op, actor, MutationPhase::Logged);
                info!(
                    operation = op.as_str(),
                    user_id = actor.user_id,
                    resource = kind.as_str(),
                    resource_id = resource.id(),
                    "Mutation recorded on ledger"
                );
            }
            Err(e) if e.is_expected_outcome() => {
                trace_phase(op, actor, MutationPhase::Denied);
                debug!(operation = op.as_str(), user_id = actor.user_id, "Mutation rejected: {}", e);
            }
            Err(e) => {
                trace_phase(op, actor, MutationPhase::Failed);
                error!(operation = op.as_str(), user_id = actor.user_id, "Mutation failed: {}", e);
            }
        }
        result
    }

    async fn run(
        &self,
        op: Operation,
        actor: &ActorContext,
        mutation: Mutation,
    ) -> MedResult<Resource> {
        trace_phase(op, actor, MutationPhase::Authorizing);
        let subject = self.resolve_subject(actor).await?;

        match mutation {
            Mutation::CreateRecord {
                patient_iin,
                fields,
            } => {
                let patient = self.store.find_patient_by_iin(&patient_iin).await?;
                self.authorize(op, &subject, &Target::patient(patient.as_ref()))?;
                let doctor = doctor_of(&subject)?;
                let patient = patient.ok_or(MedError::ResourceNotFound(Entity::Patient))?;

                trace_phase(op, actor, MutationPhase::Mutating);
                let mutated = self
                    .store
                    .create_record(doctor.doctor_id, patient.patient_id, &fields)
                    .await?;
                let record = self.commit(op, actor, mutated).await?;
                self.log_access(doctor.doctor_id, record.record_id, ACCESS_CREATE_RECORD)
                    .await;
                Ok(Resource::Record(record))
            }
            Mutation::UpdateRecord { record_id, fields } => {
                let record = self.store.get_record(record_id).await?;
                self.authorize(op, &subject, &Target::record(record.as_ref()))?;

                trace_phase(op, actor, MutationPhase::Mutating);
                let _guard = self.locks.lock(ResourceKind::Record, record_id).await;
                let record = self.store.get_record(record_id).await?;
                self.authorize(op, &subject, &Target::record(record.as_ref()))?;

                let mutated = self.store.update_record(record_id, &fields).await?;
                Ok(Resource::Record(self.commit(op, actor, mutated).await?))
            }
            Mutation::DeleteRecord { record_id } => {
                let record = self.store.get_record(record_id).await?;
                self.authorize(op, &subject, &Target::record(record.as_ref()))?;

                trace_phase(op, actor, MutationPhase::Mutating);
                let _guard = self.locks.lock(ResourceKind::Record, record_id).await;
                let record = self.store.get_record(record_id).await?;
                self.authorize(op, &subject, &Target::record(record.as_ref()))?;
                let record = record.ok_or(MedError::ResourceNotFound(Entity::Record))?;

                let mutated = self.store.delete_record(&record).await?;
                Ok(Resource::Record(self.commit(op, actor, mutated).await?))
            }
            Mutation::CreateAppointment { patient_iin, date } => {
                let patient = self.store.find_patient_by_iin(&patient_iin).await?;
                self.authorize(
                    op,
                    &subject,
                    &Target::patient(patient.as_ref()).with_date(date),
                )?;
                let doctor = doctor_of(&subject)?;
                let patient = patient.ok_or(MedError::ResourceNotFound(Entity::Patient))?;

                trace_phase(op, actor, MutationPhase::Mutating);
                let mutated = self
                    .store
                    .create_appointment(doctor.doctor_id, patient.patient_id, date)
                    .await?;
                Ok(Resource::Appointment(self.commit(op, actor, mutated).await?))
            }
            Mutation::RescheduleAppointment {
                appointment_id,
                date,
            } => {
                let appointment = self.store.get_appointment(appointment_id).await?;
                self.authorize(
                    op,
                    &subject,
                    &Target::appointment(appointment.as_ref()).with_date(date),
                )?;

                trace_phase(op, actor, MutationPhase::Mutating);
                let _guard = self
                    .locks
                    .lock(ResourceKind::Appointment, appointment_id)
                    .await;
                let appointment = self.store.get_appointment(appointment_id).await?;
                self.authorize(
                    op,
                    &subject,
                    &Target::appointment(appointment.as_ref()).with_date(date),
                )?;

                let mutated = self
                    .store
                    .reschedule_appointment(appointment_id, date)
                    .await?;
                Ok(Resource::Appointment(self.commit(op, actor, mutated).await?))
            }
            Mutation::CancelAppointment { appointment_id } => {
                let appointment = self.store.get_appointment(appointment_id).await?;
                self.authorize(op, &subject, &Target::appointment(appointment.as_ref()))?;

                trace_phase(op, actor, MutationPhase::Mutating);
                let _guard = self
                    .locks
                    .lock(ResourceKind::Appointment, appointment_id)
                    .await;
                let appointment = self.store.get_appointment(appointment_id).await?;
                self.authorize(op, &subject, &Target::appointment(appointment.as_ref()))?;
                let appointment =
                    appointment.ok_or(MedError::ResourceNotFound(Entity::Appointment))?;

                let mutated = self.store.delete_appointment(&appointment).await?;
                Ok(Resource::Appointment(self.commit(op, actor, mutated).await?))
            }
        }
    }

    /// アウトボックスのエントリを台帳へ追記する
    async fn commit<T>(
        &self,
        op: Operation,
        actor: &ActorContext,
        mutated: Mutated<T>,
    ) -> MedResult<T> {
        trace_phase(op, actor, MutationPhase::Committing);
        match self.ledger.append_pending(&mutated.pending).await {
            Ok(Some(block)) => {
                debug!(
                    block_index = block.index,
                    outbox_id = mutated.pending.id,
                    "Audit entry chained"
                );
                Ok(mutated.resource)
            }
            Ok(None) => {
                debug!(
                    outbox_id = mutated.pending.id,
                    "Audit entry was already chained by outbox drain"
                );
                Ok(mutated.resource)
            }
            Err(e) => {
                error!(
                    outbox_id = mutated.pending.id,
                    "Resource changed but ledger append failed: {}", e
                );
                Err(MedError::UnauditedMutation {
                    outbox_id: mutated.pending.id,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn log_access(&self, doctor_id: i64, record_id: i64, access_type: &str) {
        if let Err(e) = self
            .store
            .insert_access_log(doctor_id, record_id, access_type)
            .await
        {
            warn!(
                doctor_id,
                record_id, access_type, "Failed to write access log: {}", e
            );
        }
    }

    /// 患者本人の診療記録を取得する
    pub async fn read_own_records(&self, actor: &ActorContext) -> MedResult<Vec<MedicalRecord>> {
        let subject = self.resolve_subject(actor).await?;
        self.authorize(Operation::ReadOwnRecords, &subject, &Target::default())?;

        match &subject {
            AccessSubject::Patient(Some(patient)) => {
                self.store.list_records_by_patient(patient.patient_id).await
            }
            AccessSubject::Patient(None) => Err(MedError::ResourceNotFound(Entity::Patient)),
            AccessSubject::Doctor(_) => {
                Err(MedError::AuthorizationDenied(DenyReason::NotAPatient))
            }
        }
    }

    /// 医師がIINで指定した患者の診療記録を取得する
    ///
    /// 閲覧した記録ごとにアクセスログを残す。
    pub async fn read_records_by_patient(
        &self,
        actor: &ActorContext,
        patient_iin: &str,
    ) -> MedResult<Vec<MedicalRecord>> {
        let subject = self.resolve_subject(actor).await?;
        let patient = self.store.find_patient_by_iin(patient_iin).await?;

        let grant = match (&subject, &patient, self.policy.doctor_read) {
            (AccessSubject::Doctor(Some(doctor)), Some(patient), DoctorReadPolicy::RequireGrant) => {
                self.store
                    .find_active_grant(doctor.doctor_id, patient.patient_id, Utc::now())
                    .await?
            }
            _ => None,
        };

        self.authorize(
            Operation::ReadRecordsByPatient,
            &subject,
            &Target::patient(patient.as_ref()).with_grant(grant.as_ref()),
        )?;
        let doctor = doctor_of(&subject)?;
        let patient = patient.ok_or(MedError::ResourceNotFound(Entity::Patient))?;

        let records = self.store.list_records_by_patient(patient.patient_id).await?;
        for record in &records {
            self.log_access(doctor.doctor_id, record.record_id, ACCESS_READ_RECORD)
                .await;
        }
        Ok(records)
    }

    /// 自分の予約一覧を取得する
    ///
    /// 医師は担当する予約、患者は本人の予約を日時順に返す。
    pub async fn read_own_appointments(&self, actor: &ActorContext) -> MedResult<Vec<Appointment>> {
        let subject = self.resolve_subject(actor).await?;
        self.authorize(Operation::ReadOwnAppointments, &subject, &Target::default())?;

        match &subject {
            AccessSubject::Doctor(Some(doctor)) => {
                self.store.list_appointments_by_doctor(doctor.doctor_id).await
            }
            AccessSubject::Patient(Some(patient)) => {
                self.store
                    .list_appointments_by_patient(patient.patient_id)
                    .await
            }
            AccessSubject::Doctor(None) => Err(MedError::ResourceNotFound(Entity::Doctor)),
            AccessSubject::Patient(None) => Err(MedError::ResourceNotFound(Entity::Patient)),
        }
    }

    /// 医師がIINで指定した患者に閲覧許可を申請する
    ///
    /// 申請は`REQUEST_TTL_HOURS`の間だけ応答を受け付ける。台帳には記録しない。
    pub async fn request_access(
        &self,
        actor: &ActorContext,
        patient_iin: &str,
    ) -> MedResult<AccessGrant> {
        let subject = self.resolve_subject(actor).await?;
        let patient = self.store.find_patient_by_iin(patient_iin).await?;
        self.authorize(
            Operation::RequestAccess,
            &subject,
            &Target::patient(patient.as_ref()),
        )?;
        let doctor = doctor_of(&subject)?;
        let patient = patient.ok_or(MedError::ResourceNotFound(Entity::Patient))?;

        let request = self
            .store
            .request_access(doctor.doctor_id, patient.patient_id)
            .await?;
        info!(
            request_id = request.id,
            doctor_id = doctor.doctor_id,
            patient_id = patient.patient_id,
            "Access requested"
        );
        Ok(request)
    }

    /// 患者が自分宛ての申請に応答する
    ///
    /// # Arguments
    /// * `granted` - 許可する場合true
    /// * `access_duration` - 許可後に閲覧できる期間（既定は`DEFAULT_ACCESS_MINUTES`分）
    pub async fn respond_access_request(
        &self,
        actor: &ActorContext,
        request_id: i64,
        granted: bool,
        access_duration: Option<Duration>,
    ) -> MedResult<AccessGrant> {
        let subject = self.resolve_subject(actor).await?;
        let request = self.store.get_access_request(request_id).await?;
        self.authorize(
            Operation::RespondAccessRequest,
            &subject,
            &Target::request(request.as_ref()),
        )?;
        let AccessSubject::Patient(Some(patient)) = &subject else {
            return Err(MedError::AuthorizationDenied(DenyReason::NotAPatient));
        };

        let duration =
            access_duration.unwrap_or_else(|| Duration::minutes(DEFAULT_ACCESS_MINUTES));
        // 判定後に期限切れ・二重応答になった場合はストア側の条件で弾かれる
        let updated = self
            .store
            .respond_access_request(request_id, patient.patient_id, granted, duration)
            .await?;
        info!(
            request_id,
            patient_id = patient.patient_id,
            status = updated.status.as_str(),
            "Access request answered"
        );
        Ok(updated)
    }
}
