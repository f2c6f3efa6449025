use crate::controller::HoldController;
use crate::error::{BatchError, Result};
use crate::jobs::array::{parse_array_range, range_from_extend};
use crate::jobs::{JobArray, LockedJob};
use crate::request::{authorize_job_request, BatchRequest, Reply};

impl HoldController {
    /// Release holds on every live member of a locked array.
    ///
    /// Stops at the first member that fails and returns its error; members
    /// already released stay released. Slots whose job is gone are pruned.
    pub async fn release_whole_array(
        &self,
        array: &mut JobArray,
        request: &BatchRequest,
    ) -> Result<()> {
        for index in 0..array.size() {
            self.release_slot(array, index, request).await?;
        }
        Ok(())
    }

    /// Release holds on the members selected by a range expression.
    pub async fn release_array_range(
        &self,
        array: &mut JobArray,
        request: &BatchRequest,
        range: &str,
    ) -> Result<()> {
        for span in parse_array_range(range)? {
            for index in span {
                if index >= array.size() {
                    break;
                }
                self.release_slot(array, index, request).await?;
            }
        }
        Ok(())
    }

    async fn release_slot(
        &self,
        array: &mut JobArray,
        index: usize,
        request: &BatchRequest,
    ) -> Result<()> {
        let Some(job_id) = array.slot(index).map(str::to_string) else {
            return Ok(());
        };

        match self.registry.find_job(&job_id).await {
            None => {
                array.prune(index);
                Ok(())
            }
            Some(mut job) => self.release_job(request, &mut job),
        }
    }

    /// Lock the first member whose job still exists, pruning dead slots
    /// on the way.
    async fn first_live_job(&self, array: &mut JobArray) -> Option<LockedJob> {
        loop {
            let index = array.first_job_index()?;
            let job_id = array.slot(index)?.to_string();
            match self.registry.find_job(&job_id).await {
                Some(job) => return Some(job),
                None => array.prune(index),
            }
        }
    }

    /// Service a Release Array request.
    ///
    /// The caller is authorized against the first live member only.
    pub async fn req_release_array(&self, request: BatchRequest) -> Reply {
        let Some(mut array) = self.registry.get_array(&request.object).await else {
            let err = BatchError::UnknownArray(request.object.clone());
            return Reply::reject_with(&err, "Cannot find array");
        };

        let Some(job) = self.first_live_job(&mut array).await else {
            tracing::info!(array_id = %array.id, "Release requested on array with no live jobs");
            return Reply::reject(&BatchError::UnknownJob(format!("{} has no live jobs", array.id)));
        };

        if !authorize_job_request(&request, &job) {
            tracing::info!(array_id = %array.id, requester = %request.requester(), "Array release refused");
            return Reply::reject(&BatchError::PermissionDenied);
        }
        drop(job);

        let result = match range_from_extend(request.extend.as_deref()) {
            Some(range) => self.release_array_range(&mut array, &request, range).await,
            None => self.release_whole_array(&mut array, &request).await,
        };

        tracing::trace!(array_id = %array.id, "Unlocking array");
        drop(array);

        if let Err(ref e) = result {
            tracing::info!(array_id = %request.object, error = %e, "Array release stopped");
        }
        result.into()
    }
}
