// Copyright (c) 2023 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use log::debug;

use crate::{
    client::KbsClient,
    token::Token,
    types::{Challenge, ProtocolMode},
    Error, Result,
};

impl KbsClient {
    /// Obtain a passport token. `kbs_challenge` is the challenge of the
    /// discovery exchange; it is answered directly when the KBS is its own
    /// token issuer.
    pub(crate) async fn passport_token(
        &self,
        kbs_challenge: Challenge,
        advertised: &[ProtocolMode],
    ) -> Result<Token> {
        let (issuer, challenge) = match &self.token_issuer_url {
            Some(issuer) if *issuer != self.kbs_host_url => {
                debug!("request passport token from issuer {issuer}");
                (issuer.as_str(), self.auth(issuer).await?)
            }
            _ => (self.kbs_host_url.as_str(), kbs_challenge),
        };

        let response = self.attest(issuer, challenge).await?;

        // An issuer that attests without minting a token is serving the
        // background-check model.
        let Some(token) = response.token.filter(|t| !t.is_empty()) else {
            return Err(Error::ProtocolModeMismatch {
                requested: ProtocolMode::Passport,
                advertised: advertised
                    .iter()
                    .copied()
                    .filter(|m| *m != ProtocolMode::Passport)
                    .collect(),
            });
        };

        let token = Token::new(token)?;
        token.check_valid()?;
        debug!("got passport token {token:?}");
        Ok(token)
    }
}
