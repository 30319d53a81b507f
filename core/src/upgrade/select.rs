// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use async_trait::async_trait;

use crate::either::{EitherName, EitherOutput};
use crate::transport::TransportError;
use crate::upgrade::{UpgradeInfo, Upgrader};

/// Combines two upgraders into one supporting the protocols of both.
///
/// The protocols of the first element have higher priority. Nest
/// `Selector`s to compose larger candidate sets.
#[derive(Debug, Copy, Clone)]
pub struct Selector<A, B>(A, B);

impl<A, B> Selector<A, B> {
    /// Combines two upgraders into a `Selector`.
    pub fn new(a: A, b: B) -> Self {
        Selector(a, b)
    }
}

impl<A, B> UpgradeInfo for Selector<A, B>
where
    A: UpgradeInfo,
    B: UpgradeInfo,
{
    type Info = EitherName<A::Info, B::Info>;

    fn protocol_info(&self) -> Vec<Self::Info> {
        let mut v = Vec::default();
        v.extend(self.0.protocol_info().into_iter().map(EitherName::A));
        v.extend(self.1.protocol_info().into_iter().map(EitherName::B));
        v
    }
}

#[async_trait]
impl<A, B, C> Upgrader<C> for Selector<A, B>
where
    A: Upgrader<C> + Send,
    B: Upgrader<C> + Send,
    A::Info: 'static,
    B::Info: 'static,
    C: Send + 'static,
{
    type Output = EitherOutput<A::Output, B::Output>;

    async fn upgrade_inbound(
        self,
        socket: C,
        info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError> {
        match info {
            EitherName::A(info) => Ok(EitherOutput::A(self.0.upgrade_inbound(socket, info).await?)),
            EitherName::B(info) => Ok(EitherOutput::B(self.1.upgrade_inbound(socket, info).await?)),
        }
    }

    async fn upgrade_outbound(
        self,
        socket: C,
        info: <Self as UpgradeInfo>::Info,
    ) -> Result<Self::Output, TransportError> {
        match info {
            EitherName::A(info) => {
                Ok(EitherOutput::A(self.0.upgrade_outbound(socket, info).await?))
            }
            EitherName::B(info) => {
                Ok(EitherOutput::B(self.1.upgrade_outbound(socket, info).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::{DummyUpgrader, ProtocolName};

    #[test]
    fn protocol_union_keeps_order() {
        let selector = Selector::new(DummyUpgrader::new(), DummyUpgrader::new());
        let names: Vec<String> = selector
            .protocol_info()
            .iter()
            .map(|i| i.protocol_name_str())
            .collect();
        assert_eq!(names, vec!["/dummy/1.0.0", "/dummy/1.0.0"]);
    }

    #[test]
    fn dispatches_to_winner() {
        futures::executor::block_on(async {
            let selector = Selector::new(DummyUpgrader::new(), DummyUpgrader::new());
            let info = selector.protocol_info().into_iter().next().unwrap();
            let out = selector.upgrade_outbound(7usize, info).await.unwrap();
            match out {
                EitherOutput::A(v) => assert_eq!(v, 7),
                EitherOutput::B(_) => panic!("first branch has priority"),
            }
        });
    }
}
