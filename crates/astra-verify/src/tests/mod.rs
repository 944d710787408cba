mod verifier;
