//! Work registry chaincode: registration, status and paginated lookup of
//! workers.

use avalon_client::data_model::InvocationResponse;
use avalon_logger::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{Chaincode, Stub};

/// Worker accepts work orders
pub const WORKER_ACTIVE: u64 = 1;
/// Worker is temporarily unavailable
pub const WORKER_OFFLINE: u64 = 2;
/// Worker is retired
pub const WORKER_DECOMMISSIONED: u64 = 3;
/// Worker must not be trusted
pub const WORKER_COMPROMISED: u64 = 4;

/// Object type of the lookup keys
pub const OBJECT_TYPE: &str = "WorkerRegister";
/// Ids per lookup page
pub const DEFAULT_PAGE_SIZE: usize = 10;

type Reply = Result<Option<String>, String>;

/// Registered worker, stored as JSON under its id
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Worker {
    /// Unique id
    #[serde(rename = "workerID")]
    pub worker_id: String,
    /// Kind of worker, `0` is reserved for "any" in lookups
    #[serde(rename = "workerType")]
    pub worker_type: u64,
    /// Owning organization
    #[serde(rename = "organizationID")]
    pub organization_id: String,
    /// Applications the worker serves
    #[serde(
        rename = "applicationTypeId",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub application_type_id: Vec<String>,
    /// Free-form details
    #[serde(default)]
    pub details: String,
    /// One of the `WORKER_*` statuses
    #[serde(default)]
    pub status: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupReply {
    total_count: usize,
    lookup_tag: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ids: Vec<String>,
}

/// The work registry
#[derive(Debug, Clone, Copy)]
pub struct RegistryChaincode {
    page_size: usize,
}

impl Default for RegistryChaincode {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl RegistryChaincode {
    /// Serve lookups in pages of `page_size` ids (at least one)
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn register(stub: &mut Stub<'_>, args: &[String]) -> Reply {
        let mut worker = match args {
            [json] => serde_json::from_str::<Worker>(json)
                .map_err(|err| format!("workerRegister argument is not a worker: {err}"))?,
            [id, worker_type, organization, applications, details] => Worker {
                worker_id: id.clone(),
                worker_type: worker_type
                    .parse()
                    .map_err(|_| "Worker Type must be an integer".to_owned())?,
                organization_id: organization.clone(),
                application_type_id: applications.split(',').map(str::to_owned).collect(),
                details: details.clone(),
                status: 0,
            },
            _ => {
                return Err("workerRegister must include 5 arguments, workerID, workerType, \
                            organizationID, applicationTypeId, and details"
                    .to_owned())
            }
        };
        worker.status = WORKER_ACTIVE;

        Self::store(stub, &worker)?;
        for application in &worker.application_type_id {
            let key = Stub::create_composite_key(
                OBJECT_TYPE,
                &[
                    format!("{:020}", worker.worker_type),
                    format!("{:>32}", worker.organization_id),
                    format!("{application:>32}"),
                    format!("{:>32}", worker.worker_id),
                ],
            );
            stub.put_state(key, worker.worker_id.clone());
        }
        stub.set_event(
            "workerRegistered",
            json!({ "workerID": worker.worker_id }).to_string(),
        );
        debug!(worker = %worker.worker_id, "Registered worker");
        Ok(None)
    }

    fn update(stub: &mut Stub<'_>, args: &[String]) -> Reply {
        let [id, details] = args else {
            return Err("workerUpdate must include 2 arguments, workerID and details".to_owned());
        };
        let mut worker = Self::load(stub, id)?;
        worker.details.clone_from(details);
        Self::store(stub, &worker).map(Some)
    }

    fn set_status(stub: &mut Stub<'_>, args: &[String]) -> Reply {
        let [id, status] = args else {
            return Err("workerSetStatus must include 2 arguments, workID and status".to_owned());
        };
        let status = status
            .parse()
            .map_err(|_| format!("Worker status must be an integer, received {status}"))?;
        let mut worker = Self::load(stub, id)?;
        worker.status = status;
        Self::store(stub, &worker).map(Some)
    }

    fn lookup(&self, stub: &Stub<'_>, args: &[String]) -> Reply {
        let [worker_type, organization, application, tag] = args else {
            return Err("workerLookUpNext must include 4 argements, workerType, \
                        organizationID, applicationTypeId and lookupTag"
                .to_owned());
        };
        let worker_type: u64 = worker_type
            .parse()
            .map_err(|_| "Worker Type must be an integer".to_owned())?;

        // `0` matches anything and ends the narrowing
        let mut attrs = Vec::new();
        if worker_type != 0 {
            attrs.push(format!("{worker_type:020}"));
            if organization != "0" {
                attrs.push(format!("{organization:>32}"));
                if application != "0" {
                    attrs.push(format!("{application:>32}"));
                }
            }
        }

        let (entries, lookup_tag) =
            stub.partial_composite_key_page(OBJECT_TYPE, &attrs, self.page_size, tag);
        let ids: Vec<_> = entries.into_iter().map(|(_, id)| id).collect();
        let reply = LookupReply {
            total_count: ids.len(),
            lookup_tag,
            ids,
        };
        serde_json::to_string(&reply)
            .map(Some)
            .map_err(|err| err.to_string())
    }

    fn retrieve(stub: &Stub<'_>, args: &[String]) -> Reply {
        let [id] = args else {
            return Err("workerRetrieve must include 1 argument, workerID".to_owned());
        };
        let worker = Self::load(stub, id)?;
        let mut reply = json!({
            "status": worker.status,
            "workerType": worker.worker_type,
            "organizationID": worker.organization_id,
            "details": worker.details,
        });
        if !worker.application_type_id.is_empty() {
            reply["applicationTypeId"] = json!(worker.application_type_id);
        }
        Ok(Some(reply.to_string()))
    }

    fn query(stub: &Stub<'_>, args: &[String]) -> Reply {
        let Some(id) = args.first() else {
            return Err("query must include 1 argument, workerID".to_owned());
        };
        stub.get_state(id)
            .map(|raw| Some(raw.to_owned()))
            .ok_or_else(|| format!("WorkerID '{id}' does not exist"))
    }

    fn load(stub: &Stub<'_>, id: &str) -> Result<Worker, String> {
        let raw = stub
            .get_state(id)
            .ok_or_else(|| format!("Worker with ID '{id}' does not exist"))?;
        serde_json::from_str(raw).map_err(|err| err.to_string())
    }

    fn store(stub: &mut Stub<'_>, worker: &Worker) -> Result<String, String> {
        let value = serde_json::to_string(worker).map_err(|err| err.to_string())?;
        stub.put_state(worker.worker_id.clone(), value.clone());
        Ok(value)
    }
}

impl Chaincode for RegistryChaincode {
    fn invoke(&self, stub: &mut Stub<'_>, method: &str, args: &[String]) -> InvocationResponse {
        let reply = match method {
            "workerRegister" => Self::register(stub, args),
            "workerUpdate" => Self::update(stub, args),
            "workerSetStatus" => Self::set_status(stub, args),
            "workerLookUp" => match args {
                [worker_type, organization, application] => self.lookup(
                    stub,
                    &[
                        worker_type.clone(),
                        organization.clone(),
                        application.clone(),
                        String::new(),
                    ],
                ),
                _ => Err("workerLookUp must include 3 arguments, workType, organizationID \
                          and applicationTypeId"
                    .to_owned()),
            },
            "workerLookUpNext" => self.lookup(stub, args),
            "workerRetrieve" => Self::retrieve(stub, args),
            "query" => Self::query(stub, args),
            _ => Err("Invalid invoke function name".to_owned()),
        };
        match reply {
            Ok(payload) => InvocationResponse::success(payload),
            Err(message) => {
                debug!(method, %message, "Registry call failed");
                InvocationResponse::failure(InvocationResponse::STATUS_CHAINCODE_ERROR, message)
            }
        }
    }
}
